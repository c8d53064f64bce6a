use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use medidesk_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use medidesk_core::config::AppConfig;
use medidesk_core::domain::conversation::{ChatTurn, ResponseRoute, SessionId, UserId, Utterance};
use medidesk_core::domain::schedule::{Appointment, Slot};
use medidesk_core::domain::session::SessionContext;
use medidesk_core::errors::{ApplicationError, ExternalService};
use medidesk_core::flows::{BookingAction, BookingEngine, BookingEvent, BookingState};
use medidesk_core::scheduling::{AppointmentStore, InsertOutcome, SlotAllocator};

use crate::conversation::{
    detect_booking_intent, detect_cancel, detect_date_change, parse_clock_time, parse_date,
    parse_slot_choice, SlotChoice,
};
use crate::guardrails::SafetyGate;
use crate::llm::{ChatCompletionsResponder, FallbackResponder};
use crate::retrieval::{build_embedder, FaqCorpus, KnowledgeRetriever};

pub const SAFETY_REJECTION_REPLY: &str =
    "I'm sorry, but I can't respond to that. Please keep our conversation respectful.";
pub const FALLBACK_DEGRADED_REPLY: &str =
    "I'm having trouble answering right now. \
     Please try again in a moment, or call the practice directly.";
pub const STORE_DEGRADED_REPLY: &str =
    "I couldn't reach the appointment book just now. Please try again in a moment.";

/// Work the calling layer must carry out after a turn. Appointment writes
/// have already been committed atomically by the time they are reported.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    PersistChatTurn { session_id: SessionId, user_id: UserId, turn: ChatTurn },
    PersistAppointment { appointment: Appointment },
    DegradedMode { service: ExternalService, message: String },
    LogIncident { class: &'static str, message: String },
}

impl SideEffect {
    fn incident(error: &ApplicationError) -> Self {
        Self::LogIncident { class: error.class(), message: error.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouterResponse {
    pub response_text: String,
    pub route: ResponseRoute,
    pub side_effects: Vec<SideEffect>,
    /// Recoverable error behind this reply, if any. Already rendered into
    /// `response_text`.
    #[serde(skip)]
    pub error: Option<ApplicationError>,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug)]
pub struct RouterSettings {
    pub context_window_turns: usize,
    pub fallback_timeout: Duration,
    pub store_timeout: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            context_window_turns: config.llm.context_window_turns,
            fallback_timeout: fallback_budget(config.llm.timeout_secs, config.llm.max_retries),
            store_timeout: Duration::from_secs(config.database.timeout_secs),
        }
    }
}

/// Every attempt of the fallback call gets the full per-request timeout.
fn fallback_budget(timeout_secs: u64, max_retries: u32) -> Duration {
    let attempts = u64::from(max_retries).saturating_add(1);
    Duration::from_secs(timeout_secs.saturating_mul(attempts))
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            context_window_turns: 10,
            fallback_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConversationRouter {
    safety: SafetyGate,
    retriever: KnowledgeRetriever,
    fallback: Arc<dyn FallbackResponder>,
    appointments: Arc<dyn AppointmentStore>,
    allocator: SlotAllocator,
    engine: BookingEngine,
    audit: Arc<dyn AuditSink>,
    settings: RouterSettings,
}

/// Mutable scratch for one booking turn.
#[derive(Default)]
struct BookingTurn {
    replies: Vec<String>,
    claimed: Option<Appointment>,
    error: Option<ApplicationError>,
}

impl ConversationRouter {
    pub fn new(
        safety: SafetyGate,
        retriever: KnowledgeRetriever,
        fallback: Arc<dyn FallbackResponder>,
        appointments: Arc<dyn AppointmentStore>,
        allocator: SlotAllocator,
        settings: RouterSettings,
    ) -> Self {
        Self {
            safety,
            retriever,
            fallback,
            appointments,
            allocator,
            engine: BookingEngine::new(),
            audit: Arc::new(TracingAuditSink),
            settings,
        }
    }

    /// Wires every component from configuration. The FAQ corpus is read and
    /// embedded here, so a missing corpus file surfaces as `Fatal`.
    pub async fn from_config(
        config: &AppConfig,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Result<Self, ApplicationError> {
        let startup = |component: &str, error: anyhow::Error| {
            ApplicationError::Fatal(format!("{component} could not be initialised: {error:#}"))
        };

        let safety = SafetyGate::from_config(&config.safety)
            .map_err(|error| startup("safety gate", error))?;
        let embedder = build_embedder(&config.retrieval)
            .map_err(|error| startup("embedder", error))?;
        let corpus = FaqCorpus::load(&config.retrieval.faq_path, embedder.as_ref()).await?;
        let retriever = KnowledgeRetriever::new(
            Arc::new(corpus),
            embedder,
            config.retrieval.similarity_threshold,
            Duration::from_millis(config.retrieval.timeout_ms),
        );
        let fallback = ChatCompletionsResponder::from_config(&config.llm)
            .map_err(|error| startup("fallback responder", error))?;
        let allocator = config
            .scheduling
            .allocator()
            .map_err(|error| ApplicationError::Fatal(format!("scheduling: {error}")))?;

        tracing::info!(
            event_name = "router.assembled",
            classifier = safety.classifier_name(),
            faq_entries = retriever.corpus().len(),
            similarity_threshold = retriever.threshold(),
            fallback = fallback.name(),
            "conversation router ready"
        );

        Ok(Self::new(
            safety,
            retriever,
            Arc::new(fallback),
            appointments,
            allocator,
            RouterSettings::from_config(config),
        ))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    pub fn appointments(&self) -> &Arc<dyn AppointmentStore> {
        &self.appointments
    }

    /// Processes one utterance against `session`. Never fails: every
    /// per-utterance error becomes a reply plus a side effect.
    pub async fn handle(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> RouterResponse {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(session.session_id.clone()),
            Some(session.user_id.clone()),
            correlation_id.clone(),
            "conversation-router",
        );
        let mut effects = Vec::new();
        let text = utterance.text.trim();

        if matches!(session.booking, BookingState::Confirmed { .. }) {
            self.step(session, BookingEvent::Acknowledged, &audit, &mut BookingTurn::default());
        }

        let check = self.safety.classify(text).await;
        if let Some(error) = check.degraded {
            self.note_degraded(&audit, &error, &mut effects);
        }
        if check.verdict.is_toxic {
            tracing::info!(
                event_name = "router.branch.safety_rejection",
                correlation_id = %correlation_id,
                session_id = %session.session_id,
                user_id = %session.user_id,
                score = check.verdict.score,
                "utterance rejected by safety gate"
            );
            self.audit.emit(
                AuditEvent::new(
                    &audit,
                    "safety.rejected",
                    AuditCategory::Safety,
                    AuditOutcome::Rejected,
                )
                .with_metadata("score", format!("{:.3}", check.verdict.score)),
            );
            return self.finish(
                session,
                text,
                SAFETY_REJECTION_REPLY.to_string(),
                ResponseRoute::SafetyRejection,
                effects,
                None,
                correlation_id,
            );
        }

        if session.is_booking() || detect_booking_intent(text) {
            let today = utterance.timestamp.date_naive();
            let turn = self.handle_booking(text, today, session, &audit).await;
            if let Some(appointment) = &turn.claimed {
                effects.push(SideEffect::PersistAppointment { appointment: appointment.clone() });
            }

            let (reply, route) = match &turn.error {
                Some(
                    error @ (ApplicationError::ServiceUnavailable { .. }
                    | ApplicationError::Persistence(_)),
                ) => {
                    tracing::error!(
                        event_name = "router.branch.degraded",
                        correlation_id = %correlation_id,
                        session_id = %session.session_id,
                        user_id = %session.user_id,
                        error = %error,
                        "appointment store failed during booking"
                    );
                    effects.push(SideEffect::incident(error));
                    (STORE_DEGRADED_REPLY.to_string(), ResponseRoute::Degraded)
                }
                Some(error @ ApplicationError::Conflict { .. }) => {
                    effects.push(SideEffect::incident(error));
                    (turn.replies.join(" "), ResponseRoute::Booking)
                }
                _ => (turn.replies.join(" "), ResponseRoute::Booking),
            };

            if route == ResponseRoute::Booking {
                tracing::info!(
                    event_name = "router.branch.booking",
                    correlation_id = %correlation_id,
                    session_id = %session.session_id,
                    user_id = %session.user_id,
                    phase = session.booking.phase().as_str(),
                    "booking dialogue advanced"
                );
            }
            return self.finish(session, text, reply, route, effects, turn.error, correlation_id);
        }

        let retrieval = self.retriever.retrieve(text).await;
        if let Some(error) = retrieval.degraded {
            self.note_degraded(&audit, &error, &mut effects);
        }
        if let Some(answer) = retrieval.result.answer_above(self.retriever.threshold()) {
            tracing::info!(
                event_name = "router.branch.faq",
                correlation_id = %correlation_id,
                session_id = %session.session_id,
                user_id = %session.user_id,
                similarity = retrieval.result.similarity,
                "answered from FAQ corpus"
            );
            let answer = answer.to_string();
            let route = ResponseRoute::Faq;
            return self.finish(session, text, answer, route, effects, None, correlation_id);
        }

        let context = session.recent_turns(self.settings.context_window_turns).to_vec();
        let generated = bounded(
            self.settings.fallback_timeout,
            ExternalService::FallbackResponder,
            async {
                self.fallback.respond(text, &context).await.map_err(|error| {
                    let message = format!("{error:#}");
                    ApplicationError::unavailable(ExternalService::FallbackResponder, message)
                })
            },
        )
        .await;

        match generated {
            Ok(reply) => {
                tracing::info!(
                    event_name = "router.branch.fallback",
                    correlation_id = %correlation_id,
                    session_id = %session.session_id,
                    user_id = %session.user_id,
                    similarity = retrieval.result.similarity,
                    context_turns = context.len(),
                    "answered by fallback responder"
                );
                let route = ResponseRoute::Fallback;
                self.finish(session, text, reply, route, effects, None, correlation_id)
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "router.branch.degraded",
                    correlation_id = %correlation_id,
                    session_id = %session.session_id,
                    user_id = %session.user_id,
                    error = %error,
                    "fallback responder failed"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &audit,
                        "fallback.failed",
                        AuditCategory::Fallback,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                effects.push(SideEffect::incident(&error));
                self.finish(
                    session,
                    text,
                    FALLBACK_DEGRADED_REPLY.to_string(),
                    ResponseRoute::Degraded,
                    effects,
                    Some(error),
                    correlation_id,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        session: &mut SessionContext,
        user_text: &str,
        reply: String,
        route: ResponseRoute,
        mut effects: Vec<SideEffect>,
        error: Option<ApplicationError>,
        correlation_id: String,
    ) -> RouterResponse {
        let turn = ChatTurn::new(user_text, reply.clone(), route);
        session.record_turn(turn.clone());
        effects.push(SideEffect::PersistChatTurn {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            turn,
        });
        RouterResponse { response_text: reply, route, side_effects: effects, error, correlation_id }
    }

    fn note_degraded(
        &self,
        audit: &AuditContext,
        error: &ApplicationError,
        effects: &mut Vec<SideEffect>,
    ) {
        if let ApplicationError::ServiceUnavailable { service, message } = error {
            let category = match service {
                ExternalService::SafetyClassifier => AuditCategory::Safety,
                ExternalService::Embedder => AuditCategory::Retrieval,
                ExternalService::FallbackResponder => AuditCategory::Fallback,
                ExternalService::AppointmentStore => AuditCategory::Persistence,
            };
            self.audit.emit(
                AuditEvent::new(audit, "service.degraded", category, AuditOutcome::Degraded)
                    .with_metadata("service", service.as_str()),
            );
            effects.push(SideEffect::DegradedMode { service: *service, message: message.clone() });
        }
    }

    async fn handle_booking(
        &self,
        text: &str,
        today: NaiveDate,
        session: &mut SessionContext,
        audit: &AuditContext,
    ) -> BookingTurn {
        let mut turn = BookingTurn::default();

        if detect_cancel(text) {
            self.step(session, BookingEvent::CancelRequested, audit, &mut turn);
            return turn;
        }

        let result = match session.booking.clone() {
            BookingState::Idle | BookingState::Confirmed { .. } => {
                self.step(session, BookingEvent::BookingRequested, audit, &mut turn);
                match parse_date(text, today) {
                    Some(date) => {
                        turn.replies.clear();
                        self.submit_date_and_time(text, date, today, session, audit, &mut turn)
                            .await
                    }
                    None => Ok(()),
                }
            }
            BookingState::AwaitingDate => match parse_date(text, today) {
                Some(date) => {
                    self.submit_date_and_time(text, date, today, session, audit, &mut turn).await
                }
                None => {
                    self.step(session, BookingEvent::Unrecognized, audit, &mut turn);
                    Ok(())
                }
            },
            BookingState::AwaitingSlotChoice { date, candidates } => match parse_date(text, today)
            {
                Some(new_date) if new_date != date => {
                    self.step(session, BookingEvent::ChangeDateRequested, audit, &mut turn);
                    turn.replies.clear();
                    self.submit_date_and_time(text, new_date, today, session, audit, &mut turn)
                        .await
                }
                same_or_none => match parse_slot_choice(text, &candidates) {
                    SlotChoice::Offered(slot) => self.claim(slot, session, audit, &mut turn).await,
                    SlotChoice::NotOffered(time) => {
                        turn.replies.push(self.unavailable_reason(date, time));
                        self.step(session, BookingEvent::Unrecognized, audit, &mut turn);
                        Ok(())
                    }
                    SlotChoice::Unrecognized => match same_or_none {
                        Some(same_date) => {
                            self.step(session, BookingEvent::ChangeDateRequested, audit, &mut turn);
                            turn.replies.clear();
                            self.submit_date(same_date, today, session, audit, &mut turn).await
                        }
                        None if detect_date_change(text) => {
                            self.step(session, BookingEvent::ChangeDateRequested, audit, &mut turn);
                            Ok(())
                        }
                        None => {
                            self.step(session, BookingEvent::Unrecognized, audit, &mut turn);
                            Ok(())
                        }
                    },
                },
            },
        };

        if let Err(error) = result {
            turn.error = Some(error);
        }
        turn
    }

    async fn submit_date(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        session: &mut SessionContext,
        audit: &AuditContext,
        turn: &mut BookingTurn,
    ) -> Result<(), ApplicationError> {
        let existing = if date < today { BTreeSet::new() } else { self.booked(date).await? };

        let event = match self.allocator.available_slots_from(date, today, &existing) {
            Ok(candidates) => BookingEvent::DateAccepted { date, candidates },
            Err(error) => {
                let reason = error.to_string();
                turn.error = Some(ApplicationError::Validation(error));
                BookingEvent::DateRejected { reason }
            }
        };
        self.step(session, event, audit, turn);
        Ok(())
    }

    /// Submits `date` and, when the same message also names a clock time,
    /// books that time straight away if it is on offer.
    async fn submit_date_and_time(
        &self,
        text: &str,
        date: NaiveDate,
        today: NaiveDate,
        session: &mut SessionContext,
        audit: &AuditContext,
        turn: &mut BookingTurn,
    ) -> Result<(), ApplicationError> {
        self.submit_date(date, today, session, audit, turn).await?;

        let Some(time) = parse_clock_time(text) else {
            return Ok(());
        };
        let BookingState::AwaitingSlotChoice { date, candidates } = session.booking.clone() else {
            return Ok(());
        };
        match candidates.iter().find(|slot| slot.start_time == time) {
            Some(slot) => {
                turn.replies.clear();
                self.claim(*slot, session, audit, turn).await
            }
            None => {
                turn.replies.insert(0, self.unavailable_reason(date, time));
                Ok(())
            }
        }
    }

    fn unavailable_reason(&self, date: NaiveDate, time: NaiveTime) -> String {
        match self.allocator.validate_start(date, time) {
            Err(error) => format!("Sorry, {error}."),
            Ok(_) => format!("Sorry, {} is not available.", time.format("%H:%M")),
        }
    }

    async fn claim(
        &self,
        slot: Slot,
        session: &mut SessionContext,
        audit: &AuditContext,
        turn: &mut BookingTurn,
    ) -> Result<(), ApplicationError> {
        let appointment = Appointment::new(session.user_id.clone(), slot);
        // Not wrapped in `bounded`: a cancelled insert may still commit.
        let inserted = self.appointments.insert_appointment(&appointment).await?;

        match inserted {
            InsertOutcome::Inserted => {
                let claimed = BookingEvent::SlotClaimed { appointment: appointment.clone() };
                self.step(session, claimed, audit, turn);
                turn.claimed = Some(appointment);
                self.step(session, BookingEvent::Acknowledged, audit, turn);
            }
            InsertOutcome::Conflict => {
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "booking.conflict",
                        AuditCategory::Booking,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("slot", slot.to_string()),
                );
                let existing = self.booked(slot.date).await?;
                let candidates = self.allocator.available_slots(slot.date, &existing);
                self.step(session, BookingEvent::SlotLost { slot, candidates }, audit, turn);
                turn.error = Some(ApplicationError::Conflict { slot });
            }
        }
        Ok(())
    }

    async fn booked(&self, date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError> {
        bounded(
            self.settings.store_timeout,
            ExternalService::AppointmentStore,
            self.appointments.list_appointments(date),
        )
        .await
    }

    fn step(
        &self,
        session: &mut SessionContext,
        event: BookingEvent,
        audit: &AuditContext,
        turn: &mut BookingTurn,
    ) {
        let outcome =
            self.engine.apply_with_audit(&session.booking, event, self.audit.as_ref(), audit);
        let replies = outcome.actions.iter().map(|action| render_action(action, &outcome.to));
        turn.replies.extend(replies);
        session.booking = outcome.to;
    }
}

async fn bounded<T, F>(
    limit: Duration,
    service: ExternalService,
    call: F,
) -> Result<T, ApplicationError>
where
    F: Future<Output = Result<T, ApplicationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ApplicationError::unavailable(
            service,
            format!("no answer within {} ms", limit.as_millis()),
        )),
    }
}

fn human_date(date: NaiveDate) -> String {
    date.format("%A %d %B %Y").to_string()
}

fn render_action(action: &BookingAction, state: &BookingState) -> String {
    match action {
        BookingAction::PromptForDate => "Which date would you like to come in? You can give a date \
like 2026-11-02, or say 'tomorrow' or a weekday."
            .to_string(),
        BookingAction::ExplainDateRejection { reason } => {
            format!("Sorry, I can't book that date: {reason}.")
        }
        BookingAction::AnnounceNoAvailability { date } => {
            format!("There are no free appointments on {}.", human_date(*date))
        }
        BookingAction::OfferSlots { date, slots } => offer_text(*date, slots),
        BookingAction::ConfirmAppointment { appointment } => format!(
            "Your appointment is confirmed for {} at {}.",
            human_date(appointment.slot.date),
            appointment.slot.start_label()
        ),
        BookingAction::AnnounceConflict { slot } => format!(
            "Sorry, {} on {} was just booked by someone else.",
            slot.start_label(),
            human_date(slot.date)
        ),
        BookingAction::AcknowledgeCancellation => {
            "Okay, I've stopped the booking. Is there anything else I can help with?".to_string()
        }
        BookingAction::RepromptExpectedStep => match state {
            BookingState::Idle | BookingState::Confirmed { .. } => {
                "Just say 'book appointment' whenever you'd like to schedule a visit.".to_string()
            }
            BookingState::AwaitingDate => {
                "I didn't catch a date. Please give a date like 2026-11-02, \
                 or say 'tomorrow' or a weekday."
                    .to_string()
            }
            BookingState::AwaitingSlotChoice { date, candidates } => {
                format!("Please choose one of the offered times. {}", offer_text(*date, candidates))
            }
        },
    }
}

fn offer_text(date: NaiveDate, slots: &[Slot]) -> String {
    let listed: Vec<String> = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| format!("{}) {}", index + 1, slot.start_label()))
        .collect();
    format!(
        "Available times on {}: {}. Reply with a time or option number, or ask for another date.",
        human_date(date),
        listed.join(", ")
    )
}
