use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use medidesk_agent::guardrails::{LexiconClassifier, ToxicityLabel};
use medidesk_agent::runtime::{FALLBACK_DEGRADED_REPLY, SAFETY_REJECTION_REPLY, STORE_DEGRADED_REPLY};
use medidesk_agent::{
    ConversationRouter, Embedder, FallbackResponder, FaqCorpus, KnowledgeRetriever,
    RouterSettings, SafetyGate, SideEffect, ToxicityClassifier,
};
use medidesk_core::audit::InMemoryAuditSink;
use medidesk_core::domain::conversation::{ChatTurn, ResponseRoute, SessionId, UserId, Utterance};
use medidesk_core::domain::faq::FaqEntry;
use medidesk_core::domain::schedule::{Appointment, Slot};
use medidesk_core::domain::session::SessionContext;
use medidesk_core::errors::{ApplicationError, DomainError, ExternalService};
use medidesk_core::flows::BookingState;
use medidesk_core::scheduling::{AppointmentStore, InsertOutcome, SlotAllocator};
use medidesk_db::InMemoryAppointmentStore;

const OPENING_HOURS: &str = "We are open 09:00-17:00, Monday to Friday.";
const BOOKING_HOWTO: &str = "Just tell me you would like to book an appointment.";

/// Questions mentioning "hours" land at cosine 0.92 from the opening-hours
/// entry and "how do I book" questions on the booking entry; everything
/// else at 0.3 from both.
#[derive(Default)]
struct ScriptedEmbedder {
    calls: AtomicUsize,
    failing: bool,
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("embedding model not loaded"));
        }
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("hours") {
            Ok(vec![0.92, 0.3919, 0.0])
        } else if lowered.contains("how do i book") {
            Ok(vec![0.0, 0.3919, 0.92])
        } else {
            Ok(vec![0.3, 0.9539, 0.0])
        }
    }
}

#[derive(Default)]
struct ScriptedResponder {
    calls: AtomicUsize,
    context_sizes: Mutex<Vec<usize>>,
    failing: bool,
}

#[async_trait]
impl FallbackResponder for ScriptedResponder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn respond(&self, utterance: &str, context: &[ChatTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.context_sizes.lock() {
            sizes.push(context.len());
        }
        if self.failing {
            return Err(anyhow!("upstream returned 503"));
        }
        Ok(format!("generated reply to: {utterance}"))
    }
}

struct UnavailableStore;

#[async_trait]
impl AppointmentStore for UnavailableStore {
    async fn list_appointments(&self, _date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError> {
        Err(ApplicationError::Persistence("database is locked".to_string()))
    }

    async fn insert_appointment(
        &self,
        _appointment: &Appointment,
    ) -> Result<InsertOutcome, ApplicationError> {
        Err(ApplicationError::Persistence("database is locked".to_string()))
    }
}

/// Commits the insert only after a delay longer than the store timeout.
struct SlowInsertStore {
    inner: Arc<InMemoryAppointmentStore>,
    delay: Duration,
}

#[async_trait]
impl AppointmentStore for SlowInsertStore {
    async fn list_appointments(&self, date: NaiveDate) -> Result<BTreeSet<Slot>, ApplicationError> {
        self.inner.list_appointments(date).await
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<InsertOutcome, ApplicationError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_appointment(appointment).await
    }
}

struct FailingClassifier;

#[async_trait]
impl ToxicityClassifier for FailingClassifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn labels(&self, _text: &str) -> Result<Vec<ToxicityLabel>> {
        Err(anyhow!("moderation endpoint returned 502"))
    }
}

struct HangingClassifier;

#[async_trait]
impl ToxicityClassifier for HangingClassifier {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn labels(&self, _text: &str) -> Result<Vec<ToxicityLabel>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

struct Harness {
    router: Arc<ConversationRouter>,
    embedder: Arc<ScriptedEmbedder>,
    responder: Arc<ScriptedResponder>,
    store: Arc<InMemoryAppointmentStore>,
    audit: InMemoryAuditSink,
}

struct HarnessOptions {
    embedder: ScriptedEmbedder,
    responder: ScriptedResponder,
    store: Option<Arc<dyn AppointmentStore>>,
    classifier: Option<Arc<dyn ToxicityClassifier>>,
    context_window_turns: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            embedder: ScriptedEmbedder::default(),
            responder: ScriptedResponder::default(),
            store: None,
            classifier: None,
            context_window_turns: 10,
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    let embedder = Arc::new(options.embedder);
    let responder = Arc::new(options.responder);
    let store = Arc::new(InMemoryAppointmentStore::default());
    let audit = InMemoryAuditSink::default();

    let corpus = FaqCorpus::from_entries(vec![
        FaqEntry {
            question: "What are your opening hours?".to_string(),
            answer: OPENING_HOURS.to_string(),
            embedding: vec![1.0, 0.0, 0.0],
        },
        FaqEntry {
            question: "How do I book an appointment?".to_string(),
            answer: BOOKING_HOWTO.to_string(),
            embedding: vec![0.0, 0.0, 1.0],
        },
    ]);
    let retriever = KnowledgeRetriever::new(
        Arc::new(corpus),
        embedder.clone(),
        0.75,
        Duration::from_millis(500),
    );
    let classifier = options.classifier.unwrap_or_else(|| Arc::new(LexiconClassifier::default()));
    let safety = SafetyGate::new(classifier, 0.5, Duration::from_millis(500));
    let appointments: Arc<dyn AppointmentStore> = options.store.unwrap_or_else(|| store.clone());
    let settings = RouterSettings {
        context_window_turns: options.context_window_turns,
        fallback_timeout: Duration::from_secs(2),
        store_timeout: Duration::from_secs(2),
    };

    let router = ConversationRouter::new(
        safety,
        retriever,
        responder.clone(),
        appointments,
        SlotAllocator::default(),
        settings,
    )
    .with_audit_sink(Arc::new(audit.clone()));

    Harness { router: Arc::new(router), embedder, responder, store, audit }
}

/// Sunday 18 October 2026, mid-morning.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).single().expect("timestamp")
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).expect("date")
}

fn session(user: &str) -> SessionContext {
    SessionContext::new(SessionId(format!("session-{user}")), UserId(user.to_string()))
}

fn say(session: &SessionContext, text: &str) -> Utterance {
    Utterance::at(session.user_id.clone(), text, now())
}

fn offered(session: &SessionContext) -> Vec<Slot> {
    match &session.booking {
        BookingState::AwaitingSlotChoice { candidates, .. } => candidates.clone(),
        other => panic!("expected slot choice, got {other:?}"),
    }
}

fn persisted_appointments(effects: &[SideEffect]) -> Vec<&Appointment> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            SideEffect::PersistAppointment { appointment } => Some(appointment),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn close_question_is_answered_from_the_faq_without_the_fallback() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "What are your hours?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Faq);
    assert_eq!(response.response_text, OPENING_HOURS);
    assert!(response.error.is_none());
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.responder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(alice.history().len(), 1);
    assert!(matches!(
        response.side_effects.last(),
        Some(SideEffect::PersistChatTurn { turn, .. }) if turn.route == ResponseRoute::Faq
    ));
}

#[tokio::test]
async fn distant_question_goes_to_the_fallback_responder() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "Can I bring my dog?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Fallback);
    assert_eq!(response.response_text, "generated reply to: Can I bring my dog?");
    assert_eq!(h.responder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fallback_sees_only_the_configured_context_window() {
    let h = harness(HarnessOptions { context_window_turns: 2, ..HarnessOptions::default() });
    let mut alice = session("alice");

    for text in ["hello", "is there parking?", "do you take walk-ins?", "thanks, anything else?"] {
        h.router.handle(&say(&alice, text), &mut alice).await;
    }

    let sizes = h.responder.context_sizes.lock().expect("sizes").clone();
    assert_eq!(sizes, vec![0, 1, 2, 2]);
}

#[tokio::test]
async fn toxic_utterance_is_rejected_before_any_other_component() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "I want to book an appointment"), &mut alice).await;
    assert_eq!(alice.booking, BookingState::AwaitingDate);

    let response =
        h.router.handle(&say(&alice, "you are a useless idiot, what are your hours"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::SafetyRejection);
    assert_eq!(response.response_text, SAFETY_REJECTION_REPLY);
    assert_eq!(response.side_effects.len(), 1);
    assert!(matches!(response.side_effects[0], SideEffect::PersistChatTurn { .. }));
    assert_eq!(alice.booking, BookingState::AwaitingDate);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.responder.calls.load(Ordering::SeqCst), 0);
    assert!(h.audit.event_types().contains(&"safety.rejected".to_string()));
}

#[tokio::test]
async fn booking_dialogue_confirms_and_returns_to_idle() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let prompt = h.router.handle(&say(&alice, "I'd like to book an appointment"), &mut alice).await;
    assert_eq!(prompt.route, ResponseRoute::Booking);
    assert!(prompt.response_text.contains("Which date"));
    assert_eq!(alice.booking, BookingState::AwaitingDate);

    let offer = h.router.handle(&say(&alice, "tomorrow please"), &mut alice).await;
    assert_eq!(offer.route, ResponseRoute::Booking);
    assert!(offer.response_text.contains("1) 09:00, 2) 09:30"));
    let candidates = offered(&alice);
    assert_eq!(candidates.len(), 14);
    assert!(candidates.iter().all(|slot| slot.date == monday()));

    let confirmed = h.router.handle(&say(&alice, "10:00"), &mut alice).await;
    assert_eq!(confirmed.route, ResponseRoute::Booking);
    assert!(confirmed.response_text.contains("confirmed for Monday 19 October 2026 at 10:00"));
    assert_eq!(alice.booking, BookingState::Idle);

    let written = persisted_appointments(&confirmed.side_effects);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].user_id, UserId("alice".to_string()));
    assert_eq!(written[0].slot.start_label(), "10:00");

    let booked = h.store.all().await;
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].slot, written[0].slot);
    assert_eq!(h.responder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn date_in_the_booking_request_skips_the_date_prompt() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "book appointment for 2026-10-19"), &mut alice).await;

    assert!(response.response_text.starts_with("Available times on Monday 19 October 2026"));
    assert_eq!(offered(&alice).len(), 14);
}

#[tokio::test]
async fn past_date_is_rejected_and_reprompted() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;

    let response = h.router.handle(&say(&alice, "2026-10-01"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Booking);
    assert!(matches!(
        response.error,
        Some(ApplicationError::Validation(DomainError::PastDate { .. }))
    ));
    assert!(response.response_text.contains("is in the past"));
    assert!(response.response_text.contains("Which date"));
    assert_eq!(alice.booking, BookingState::AwaitingDate);
}

#[tokio::test]
async fn time_inside_the_break_is_explained_and_the_offer_repeated() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "monday"), &mut alice).await;

    let response = h.router.handle(&say(&alice, "13:30 works for me"), &mut alice).await;

    assert!(response.response_text.contains("break window"));
    assert!(response.response_text.contains("Please choose one of the offered times"));
    assert_eq!(offered(&alice).len(), 14);
    assert!(persisted_appointments(&response.side_effects).is_empty());
}

#[tokio::test]
async fn option_number_and_date_change_are_understood() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "tomorrow"), &mut alice).await;

    h.router.handle(&say(&alice, "can we do a different day?"), &mut alice).await;
    assert_eq!(alice.booking, BookingState::AwaitingDate);

    h.router.handle(&say(&alice, "tuesday"), &mut alice).await;
    let response = h.router.handle(&say(&alice, "option 2"), &mut alice).await;

    let written = persisted_appointments(&response.side_effects);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].slot.date, NaiveDate::from_ymd_opt(2026, 10, 20).expect("date"));
    assert_eq!(written[0].slot.start_label(), "09:30");
}

#[tokio::test]
async fn cancel_abandons_booking_without_writing() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "tomorrow"), &mut alice).await;

    let response = h.router.handle(&say(&alice, "never mind, cancel that"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Booking);
    assert!(response.response_text.contains("stopped the booking"));
    assert_eq!(alice.booking, BookingState::Idle);
    assert!(h.store.all().await.is_empty());

    let next = h.router.handle(&say(&alice, "What are your hours?"), &mut alice).await;
    assert_eq!(next.route, ResponseRoute::Faq);
}

#[tokio::test]
async fn losing_a_slot_reoffers_the_remaining_times() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    let mut bob = session("bob");
    for person in [&mut alice, &mut bob] {
        h.router.handle(&say(person, "book"), person).await;
        h.router.handle(&say(person, "tomorrow"), person).await;
    }

    let won = h.router.handle(&say(&alice, "10:00"), &mut alice).await;
    assert_eq!(persisted_appointments(&won.side_effects).len(), 1);

    let lost = h.router.handle(&say(&bob, "10:00"), &mut bob).await;

    assert_eq!(lost.route, ResponseRoute::Booking);
    assert!(matches!(lost.error, Some(ApplicationError::Conflict { slot }) if slot.start_label() == "10:00"));
    assert!(lost.response_text.contains("just booked by someone else"));
    assert!(persisted_appointments(&lost.side_effects).is_empty());
    assert!(lost
        .side_effects
        .iter()
        .any(|effect| matches!(effect, SideEffect::LogIncident { class: "conflict", .. })));

    let remaining = offered(&bob);
    assert_eq!(remaining.len(), 13);
    assert!(remaining.iter().all(|slot| slot.start_label() != "10:00"));
    assert!(h.audit.event_types().contains(&"booking.conflict".to_string()));
    assert_eq!(h.store.all().await.len(), 1);
}

#[tokio::test]
async fn racing_sessions_produce_exactly_one_appointment() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    let mut bob = session("bob");
    for person in [&mut alice, &mut bob] {
        h.router.handle(&say(person, "book"), person).await;
        h.router.handle(&say(person, "tomorrow"), person).await;
    }

    let alice_says = say(&alice, "11:30");
    let bob_says = say(&bob, "11:30");
    let (first, second) = tokio::join!(
        h.router.handle(&alice_says, &mut alice),
        h.router.handle(&bob_says, &mut bob)
    );

    let writes = persisted_appointments(&first.side_effects).len()
        + persisted_appointments(&second.side_effects).len();
    let conflicts = [&first, &second]
        .iter()
        .filter(|response| matches!(response.error, Some(ApplicationError::Conflict { .. })))
        .count();
    assert_eq!(writes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(h.store.all().await.len(), 1);
}

#[tokio::test]
async fn failing_fallback_degrades_with_an_incident() {
    let h = harness(HarnessOptions {
        responder: ScriptedResponder { failing: true, ..ScriptedResponder::default() },
        ..HarnessOptions::default()
    });
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "Can I bring my dog?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Degraded);
    assert_eq!(response.response_text, FALLBACK_DEGRADED_REPLY);
    assert!(matches!(
        response.error,
        Some(ApplicationError::ServiceUnavailable {
            service: ExternalService::FallbackResponder,
            ..
        })
    ));
    assert!(response
        .side_effects
        .iter()
        .any(|effect| matches!(effect, SideEffect::LogIncident { class: "service_unavailable", .. })));
    assert_eq!(alice.history().len(), 1);
}

#[tokio::test]
async fn embedder_outage_is_reported_and_falls_through_to_the_fallback() {
    let h = harness(HarnessOptions {
        embedder: ScriptedEmbedder { failing: true, ..ScriptedEmbedder::default() },
        ..HarnessOptions::default()
    });
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "What are your hours?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Fallback);
    assert!(response.side_effects.iter().any(|effect| matches!(
        effect,
        SideEffect::DegradedMode { service: ExternalService::Embedder, .. }
    )));
}

#[tokio::test]
async fn unavailable_store_keeps_the_dialogue_alive() {
    let h = harness(HarnessOptions {
        store: Some(Arc::new(UnavailableStore)),
        ..HarnessOptions::default()
    });
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "book appointment for tomorrow"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Degraded);
    assert_eq!(response.response_text, STORE_DEGRADED_REPLY);
    assert!(matches!(response.error, Some(ApplicationError::Persistence(_))));
    assert_eq!(alice.booking, BookingState::AwaitingDate);
}

#[tokio::test]
async fn side_effects_serialise_with_a_kind_tag() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "What are your hours?"), &mut alice).await;
    let encoded = serde_json::to_value(&response).expect("serialise response");

    assert_eq!(encoded["route"], "faq");
    assert_eq!(encoded["side_effects"][0]["kind"], "persist_chat_turn");
    assert_eq!(encoded["side_effects"][0]["turn"]["route"], "faq");
    assert!(encoded.get("error").is_none());
}

#[tokio::test]
async fn how_to_book_question_is_answered_from_the_faq() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "How do I book an appointment?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Faq);
    assert_eq!(response.response_text, BOOKING_HOWTO);
    assert_eq!(alice.booking, BookingState::Idle);
    assert_eq!(h.responder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn new_date_with_a_time_while_choosing_books_the_new_date() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "monday"), &mut alice).await;
    assert!(offered(&alice).iter().any(|slot| slot.start_label() == "10:00"));

    let response =
        h.router.handle(&say(&alice, "actually 2026-10-20 at 10:00"), &mut alice).await;

    assert!(response.response_text.contains("confirmed for Tuesday 20 October 2026 at 10:00"));
    let written = persisted_appointments(&response.side_effects);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].slot.date, NaiveDate::from_ymd_opt(2026, 10, 20).expect("date"));
    let booked = h.store.all().await;
    assert_eq!(booked.len(), 1);
    assert!(booked.iter().all(|appointment| appointment.slot.date != monday()));
    assert_eq!(alice.booking, BookingState::Idle);
}

#[tokio::test]
async fn new_date_with_an_unavailable_time_offers_the_new_day() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "monday"), &mut alice).await;

    let response = h.router.handle(&say(&alice, "tuesday at 13:30 instead"), &mut alice).await;

    assert!(response.response_text.starts_with("Sorry, "));
    assert!(response.response_text.contains("Available times on Tuesday 20 October 2026"));
    let candidates = offered(&alice);
    assert!(candidates.iter().all(|slot| slot.date.to_string() == "2026-10-20"));
    assert!(persisted_appointments(&response.side_effects).is_empty());
    assert!(h.store.all().await.is_empty());
}

#[tokio::test]
async fn date_and_time_in_one_request_book_directly() {
    let h = harness(HarnessOptions::default());
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "book monday at 2pm"), &mut alice).await;

    assert!(response.response_text.contains("confirmed for Monday 19 October 2026 at 14:00"));
    assert_eq!(persisted_appointments(&response.side_effects).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_insert_is_reported_as_booked_once_it_commits() {
    let inner = Arc::new(InMemoryAppointmentStore::default());
    let h = harness(HarnessOptions {
        store: Some(Arc::new(SlowInsertStore {
            inner: Arc::clone(&inner),
            delay: Duration::from_secs(5),
        })),
        ..HarnessOptions::default()
    });
    let mut alice = session("alice");
    h.router.handle(&say(&alice, "book"), &mut alice).await;
    h.router.handle(&say(&alice, "tomorrow"), &mut alice).await;

    let response = h.router.handle(&say(&alice, "10:00"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Booking);
    assert!(response.error.is_none());
    assert!(response.response_text.contains("confirmed for Monday 19 October 2026 at 10:00"));
    assert_eq!(persisted_appointments(&response.side_effects).len(), 1);
    assert_eq!(inner.all().await.len(), 1);
    assert_eq!(alice.booking, BookingState::Idle);
}

async fn assert_answered_despite_classifier_outage(classifier: Arc<dyn ToxicityClassifier>) {
    let h = harness(HarnessOptions { classifier: Some(classifier), ..HarnessOptions::default() });
    let mut alice = session("alice");

    let response = h.router.handle(&say(&alice, "What are your hours?"), &mut alice).await;

    assert_eq!(response.route, ResponseRoute::Faq);
    assert_eq!(response.response_text, OPENING_HOURS);
    assert!(response.side_effects.iter().any(|effect| matches!(
        effect,
        SideEffect::DegradedMode { service: ExternalService::SafetyClassifier, .. }
    )));
    assert!(matches!(
        response.side_effects.last(),
        Some(SideEffect::PersistChatTurn { turn, .. }) if turn.route == ResponseRoute::Faq
    ));
}

#[tokio::test]
async fn failing_classifier_lets_the_utterance_through_in_degraded_mode() {
    assert_answered_despite_classifier_outage(Arc::new(FailingClassifier)).await;
}

#[tokio::test(start_paused = true)]
async fn hanging_classifier_times_out_and_the_utterance_is_still_answered() {
    assert_answered_despite_classifier_outage(Arc::new(HangingClassifier)).await;
}
