use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use medidesk_core::domain::conversation::{ChatTurn, SessionId, SessionSummary, UserId};
use medidesk_core::domain::feedback::Feedback;
use medidesk_core::domain::profile::PatientProfile;
use medidesk_core::errors::ApplicationError;

pub mod appointment;
pub mod chat_history;
pub mod feedback;
pub mod memory;
pub mod profile;

pub use appointment::SqlAppointmentStore;
pub use chat_history::SqlChatHistoryRepository;
pub use feedback::SqlFeedbackRepository;
pub use memory::{
    InMemoryAppointmentStore, InMemoryChatHistoryRepository, InMemoryFeedbackRepository,
    InMemoryPatientProfileRepository,
};
pub use profile::SqlPatientProfileRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Completed conversation turns, keyed by user and session.
#[async_trait]
pub trait ChatHistoryRepository: Send + Sync {
    async fn save_turn(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        turn: &ChatTurn,
    ) -> Result<(), RepositoryError>;

    /// Most recently active session first.
    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<SessionSummary>, RepositoryError>;

    /// Turns of one session, oldest first.
    async fn history(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Vec<ChatTurn>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn submit_feedback(&self, feedback: &Feedback) -> Result<(), RepositoryError>;

    async fn list_feedback(&self, user_id: &UserId) -> Result<Vec<Feedback>, RepositoryError>;
}

/// Intake details, one row per user.
#[async_trait]
pub trait PatientProfileRepository: Send + Sync {
    /// Inserts the profile or replaces the user's existing one.
    async fn upsert_profile(&self, profile: &PatientProfile) -> Result<(), RepositoryError>;

    async fn find_profile(&self, user_id: &UserId)
        -> Result<Option<PatientProfile>, RepositoryError>;
}

/// Fixed-width UTC form so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}
