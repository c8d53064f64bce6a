use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::{sqlite::SqliteRow, Row};

use medidesk_core::domain::conversation::UserId;
use medidesk_core::domain::schedule::{Appointment, AppointmentId, Slot};
use medidesk_core::errors::ApplicationError;
use medidesk_core::scheduling::{AppointmentStore, InsertOutcome};

use super::{format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

pub struct SqlAppointmentStore {
    pool: DbPool,
}

impl SqlAppointmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, appointment_date, start_time, end_time, created_at
            FROM appointment
            WHERE user_id = ?
            ORDER BY appointment_date ASC, start_time ASC
            "#,
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(appointment_from_row).collect()
    }
}

#[async_trait]
impl AppointmentStore for SqlAppointmentStore {
    async fn list_appointments(&self, date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError> {
        let rows = sqlx::query(
            r#"
            SELECT appointment_date, start_time, end_time
            FROM appointment
            WHERE appointment_date = ?
            "#,
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let slots = rows.iter().map(slot_from_row).collect::<Result<BTreeSet<_>, _>>()?;
        Ok(slots)
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<InsertOutcome, ApplicationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO appointment (
                id, user_id, appointment_date, start_time, end_time, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&appointment.id.0)
        .bind(&appointment.user_id.0)
        .bind(appointment.slot.date.format(DATE_FORMAT).to_string())
        .bind(appointment.slot.start_time.format(TIME_FORMAT).to_string())
        .bind(appointment.slot.end_time.format(TIME_FORMAT).to_string())
        .bind(format_timestamp(&appointment.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                tracing::debug!(
                    event_name = "store.appointment.unique_violation",
                    slot = %appointment.slot,
                    "slot already held"
                );
                Ok(InsertOutcome::Conflict)
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("invalid appointment_date `{value}`: {e}")))
}

fn parse_time(column: &str, value: &str) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("invalid time in `{column}`: {e}")))
}

fn slot_from_row(row: &SqliteRow) -> Result<Slot, RepositoryError> {
    let date: String = row.try_get("appointment_date")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: String = row.try_get("end_time")?;

    Ok(Slot {
        date: parse_date(&date)?,
        start_time: parse_time("start_time", &start_time)?,
        end_time: parse_time("end_time", &end_time)?,
    })
}

fn appointment_from_row(row: &SqliteRow) -> Result<Appointment, RepositoryError> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Appointment {
        id: AppointmentId(id),
        user_id: UserId(user_id),
        slot: slot_from_row(row)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
