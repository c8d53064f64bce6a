pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod scheduling;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::conversation::{
    ChatTurn, ResponseRoute, SessionId, SessionSummary, UserId, Utterance,
};
pub use domain::faq::{FaqDocument, FaqEntry, RetrievalResult};
pub use domain::feedback::Feedback;
pub use domain::schedule::{Appointment, AppointmentId, Slot};
pub use domain::session::SessionContext;
pub use errors::{ApplicationError, DomainError, ExternalService, InterfaceError};
pub use flows::{BookingAction, BookingEngine, BookingEvent, BookingPhase, BookingState};
pub use scheduling::{AppointmentStore, InsertOutcome, PastDatePolicy, SlotAllocator};
