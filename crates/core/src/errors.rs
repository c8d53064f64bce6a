use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::schedule::Slot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalService {
    SafetyClassifier,
    Embedder,
    FallbackResponder,
    AppointmentStore,
}

impl ExternalService {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyClassifier => "safety_classifier",
            Self::Embedder => "embedder",
            Self::FallbackResponder => "fallback_responder",
            Self::AppointmentStore => "appointment_store",
        }
    }
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{date} is in the past")]
    PastDate { date: NaiveDate },
    #[error("{time} falls inside the break window {start}-{end}")]
    DuringBreak { time: NaiveTime, start: NaiveTime, end: NaiveTime },
    #[error("{time} is outside business hours {open}-{close}")]
    OutsideBusinessHours { time: NaiveTime, open: NaiveTime, close: NaiveTime },
    #[error("{time} is not aligned to the {slot_minutes}-minute slot grid")]
    MisalignedSlot { time: NaiveTime, slot_minutes: u32 },
    #[error("feedback text must not be empty")]
    EmptyFeedback,
    #[error("patient name must not be empty")]
    EmptyPatientName,
    #[error("birth date {birth_date} is in the future")]
    FutureBirthDate { birth_date: NaiveDate },
    #[error("invalid business hours: {0}")]
    InvalidBusinessHours(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Per-utterance failure taxonomy. Everything except `Fatal` is recoverable
/// and is turned into a user-facing reply at the router boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("{service} unavailable: {message}")]
    ServiceUnavailable { service: ExternalService, message: String },
    #[error("slot {slot} was claimed by another booking")]
    Conflict { slot: Slot },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ApplicationError {
    pub fn unavailable(service: ExternalService, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { service, message: message.into() }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Conflict { .. } => "conflict",
            Self::Persistence(_) => "persistence",
            Self::Fatal(_) => "fatal",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "That time slot was just taken. Please pick another available slot."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Validation(error) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Conflict { slot } => Self::Conflict {
                message: format!("slot {slot} already booked"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::ServiceUnavailable { service, message } => Self::ServiceUnavailable {
                message: format!("{service}: {message}"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Fatal(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
