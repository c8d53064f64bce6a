pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use repositories::{
    ChatHistoryRepository, FeedbackRepository, InMemoryAppointmentStore,
    InMemoryChatHistoryRepository, InMemoryFeedbackRepository, InMemoryPatientProfileRepository,
    PatientProfileRepository, RepositoryError, SqlAppointmentStore, SqlChatHistoryRepository,
    SqlFeedbackRepository, SqlPatientProfileRepository,
};
