use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::UserId;
use crate::errors::DomainError;

/// Intake details a patient gives before booking. One profile per user;
/// saving again replaces it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub user_id: UserId,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub reason_for_appointment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PatientProfile {
    /// Trims free text. A blank reason is stored as none.
    pub fn new(
        user_id: UserId,
        full_name: &str,
        birth_date: NaiveDate,
        reason_for_appointment: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, DomainError> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(DomainError::EmptyPatientName);
        }
        if birth_date > today {
            return Err(DomainError::FutureBirthDate { birth_date });
        }

        let reason_for_appointment = reason_for_appointment
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);

        Ok(Self {
            user_id,
            full_name: full_name.to_string(),
            birth_date,
            reason_for_appointment,
            updated_at: Utc::now(),
        })
    }
}
