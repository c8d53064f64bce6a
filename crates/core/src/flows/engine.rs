use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{BookingAction, BookingEvent, BookingState, TransitionOutcome};

/// The appointment booking state machine.
///
/// Transitions are total: an event that does not fit the current state leaves
/// the state untouched and asks the caller to re-prompt for the expected step.
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingEngine;

impl BookingEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> BookingState {
        BookingState::Idle
    }

    pub fn apply(&self, current: &BookingState, event: BookingEvent) -> TransitionOutcome {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &BookingState,
        event: BookingEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> TransitionOutcome
    where
        S: AuditSink + ?Sized,
    {
        let outcome = self.apply(current, event);
        let (event_type, audit_outcome) = if outcome.accepted {
            ("booking.transition_applied", AuditOutcome::Success)
        } else {
            ("booking.transition_ignored", AuditOutcome::Rejected)
        };
        sink.emit(
            AuditEvent::new(audit, event_type, AuditCategory::Booking, audit_outcome)
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.phase().as_str())
                .with_metadata("event", outcome.event),
        );
        outcome
    }
}

fn transition(current: &BookingState, event: BookingEvent) -> TransitionOutcome {
    use BookingAction::{
        AcknowledgeCancellation, AnnounceConflict, AnnounceNoAvailability, ConfirmAppointment,
        ExplainDateRejection, OfferSlots, PromptForDate,
    };
    use BookingState::{AwaitingDate, AwaitingSlotChoice, Confirmed, Idle};

    let from = current.phase();
    let event_name = event.name();
    let accept = |to: BookingState, actions: Vec<BookingAction>| TransitionOutcome {
        from,
        to,
        event: event_name,
        accepted: true,
        actions,
    };

    match (current, event) {
        (_, BookingEvent::CancelRequested) => accept(Idle, vec![AcknowledgeCancellation]),

        (Idle, BookingEvent::BookingRequested) => accept(AwaitingDate, vec![PromptForDate]),

        (AwaitingDate, BookingEvent::DateAccepted { date, candidates }) => {
            if candidates.is_empty() {
                accept(AwaitingDate, vec![AnnounceNoAvailability { date }, PromptForDate])
            } else {
                accept(
                    AwaitingSlotChoice { date, candidates: candidates.clone() },
                    vec![OfferSlots { date, slots: candidates }],
                )
            }
        }

        (AwaitingDate, BookingEvent::DateRejected { reason }) => {
            accept(AwaitingDate, vec![ExplainDateRejection { reason }, PromptForDate])
        }

        (AwaitingSlotChoice { .. }, BookingEvent::SlotClaimed { appointment })
            if current.offers(&appointment.slot) =>
        {
            let confirmed = Confirmed { appointment: appointment.clone() };
            accept(confirmed, vec![ConfirmAppointment { appointment }])
        }

        (AwaitingSlotChoice { date, .. }, BookingEvent::SlotLost { slot, candidates }) => {
            let date = *date;
            let remaining: Vec<_> =
                candidates.into_iter().filter(|candidate| candidate.key() != slot.key()).collect();
            if remaining.is_empty() {
                accept(
                    AwaitingDate,
                    vec![AnnounceConflict { slot }, AnnounceNoAvailability { date }, PromptForDate],
                )
            } else {
                accept(
                    AwaitingSlotChoice { date, candidates: remaining.clone() },
                    vec![AnnounceConflict { slot }, OfferSlots { date, slots: remaining }],
                )
            }
        }

        (AwaitingSlotChoice { .. }, BookingEvent::ChangeDateRequested) => {
            accept(AwaitingDate, vec![PromptForDate])
        }

        (Confirmed { .. }, BookingEvent::Acknowledged) => accept(Idle, Vec::new()),

        (state, _) => TransitionOutcome {
            from,
            to: state.clone(),
            event: event_name,
            accepted: false,
            actions: vec![BookingAction::RepromptExpectedStep],
        },
    }
}
