use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tokio::sync::RwLock;

use medidesk_core::domain::conversation::{ChatTurn, SessionId, SessionSummary, UserId};
use medidesk_core::domain::feedback::Feedback;
use medidesk_core::domain::profile::PatientProfile;
use medidesk_core::domain::schedule::{Appointment, Slot};
use medidesk_core::errors::ApplicationError;
use medidesk_core::scheduling::{AppointmentStore, InsertOutcome};

use super::{
    ChatHistoryRepository, FeedbackRepository, PatientProfileRepository, RepositoryError,
};

/// Appointment book held in process. The slot check and the insert happen
/// under one write lock.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<BTreeMap<(NaiveDate, NaiveTime), Appointment>>,
}

impl InMemoryAppointmentStore {
    pub async fn all(&self) -> Vec<Appointment> {
        self.appointments.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn list_appointments(&self, date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .filter(|appointment| appointment.slot.date == date)
            .map(|appointment| appointment.slot)
            .collect())
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<InsertOutcome, ApplicationError> {
        let mut appointments = self.appointments.write().await;
        let key = appointment.slot.key();
        if appointments.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        appointments.insert(key, appointment.clone());
        Ok(InsertOutcome::Inserted)
    }
}

struct StoredTurn {
    user_id: UserId,
    session_id: SessionId,
    turn: ChatTurn,
}

#[derive(Default)]
pub struct InMemoryChatHistoryRepository {
    turns: RwLock<Vec<StoredTurn>>,
}

#[async_trait]
impl ChatHistoryRepository for InMemoryChatHistoryRepository {
    async fn save_turn(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        turn: &ChatTurn,
    ) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        turns.push(StoredTurn {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            turn: turn.clone(),
        });
        Ok(())
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<SessionSummary>, RepositoryError> {
        let turns = self.turns.read().await;
        let mut sessions: Vec<(usize, SessionSummary)> = Vec::new();
        for (position, stored) in turns.iter().enumerate() {
            if &stored.user_id != user_id {
                continue;
            }
            let at = stored.turn.occurred_at;
            match sessions.iter_mut().find(|(_, summary)| summary.session_id == stored.session_id) {
                Some((last_position, summary)) => {
                    *last_position = position;
                    summary.turn_count += 1;
                    summary.started_at = summary.started_at.min(at);
                    summary.last_activity_at = summary.last_activity_at.max(at);
                }
                None => sessions.push((
                    position,
                    SessionSummary {
                        session_id: stored.session_id.clone(),
                        turn_count: 1,
                        started_at: at,
                        last_activity_at: at,
                    },
                )),
            }
        }
        sessions.sort_by(|left, right| right.0.cmp(&left.0));
        Ok(sessions.into_iter().map(|(_, summary)| summary).collect())
    }

    async fn history(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        Ok(turns
            .iter()
            .filter(|stored| &stored.user_id == user_id && &stored.session_id == session_id)
            .map(|stored| stored.turn.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    entries: RwLock<Vec<Feedback>>,
}

#[async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn submit_feedback(&self, feedback: &Feedback) -> Result<(), RepositoryError> {
        self.entries.write().await.push(feedback.clone());
        Ok(())
    }

    async fn list_feedback(&self, user_id: &UserId) -> Result<Vec<Feedback>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| &entry.user_id == user_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryPatientProfileRepository {
    profiles: RwLock<HashMap<UserId, PatientProfile>>,
}

#[async_trait]
impl PatientProfileRepository for InMemoryPatientProfileRepository {
    async fn upsert_profile(&self, profile: &PatientProfile) -> Result<(), RepositoryError> {
        self.profiles.write().await.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn find_profile(
        &self,
        user_id: &UserId,
    ) -> Result<Option<PatientProfile>, RepositoryError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }
}
