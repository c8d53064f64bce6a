use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::schedule::{Appointment, Slot};
use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another appointment already holds the same (date, start_time).
    Conflict,
}

/// Persistent appointment book.
///
/// `insert_appointment` must be an atomic check-and-insert on
/// (date, start_time): of two concurrent inserts for the same slot exactly
/// one returns `Inserted`.
///
/// Callers await an insert to completion and never cancel it part way, so
/// the outcome they report always matches what was committed. Stores bound
/// their own latency (pool acquire and busy timeouts for SQL).
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn list_appointments(&self, date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError>;

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<InsertOutcome, ApplicationError>;
}
