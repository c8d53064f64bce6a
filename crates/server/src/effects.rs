use std::sync::Arc;

use medidesk_agent::SideEffect;
use medidesk_db::ChatHistoryRepository;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub applied: usize,
    pub failed: usize,
}

/// Applies the side effects the router hands back after each turn.
///
/// Failures are logged and counted; they never turn a delivered reply into
/// an error.
pub struct SideEffectExecutor {
    history: Arc<dyn ChatHistoryRepository>,
}

impl SideEffectExecutor {
    pub fn new(history: Arc<dyn ChatHistoryRepository>) -> Self {
        Self { history }
    }

    pub async fn apply(&self, effects: &[SideEffect], correlation_id: &str) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for effect in effects {
            match effect {
                SideEffect::PersistChatTurn { session_id, user_id, turn } => {
                    match self.history.save_turn(user_id, session_id, turn).await {
                        Ok(()) => report.applied += 1,
                        Err(error) => {
                            report.failed += 1;
                            tracing::error!(
                                event_name = "effects.chat_turn.persist_failed",
                                correlation_id,
                                session_id = %session_id,
                                user_id = %user_id,
                                error = %error,
                                "failed to persist chat turn"
                            );
                        }
                    }
                }
                SideEffect::PersistAppointment { appointment } => {
                    report.applied += 1;
                    tracing::info!(
                        event_name = "effects.appointment.recorded",
                        correlation_id,
                        user_id = %appointment.user_id,
                        appointment_id = %appointment.id.0,
                        slot = %appointment.slot,
                        "appointment booked"
                    );
                }
                SideEffect::DegradedMode { service, message } => {
                    report.applied += 1;
                    tracing::warn!(
                        event_name = "effects.degraded_mode",
                        correlation_id,
                        service = %service,
                        error = %message,
                        "external service degraded"
                    );
                }
                SideEffect::LogIncident { class, message } => {
                    report.applied += 1;
                    tracing::warn!(
                        event_name = "effects.incident",
                        correlation_id,
                        class,
                        error = %message,
                        "incident recorded"
                    );
                }
            }
        }

        report
    }
}
