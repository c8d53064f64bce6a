use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::schedule::{Appointment, Slot};

/// Coarse label of a [`BookingState`], used for logs and persistence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPhase {
    Idle,
    AwaitingDate,
    AwaitingSlotChoice,
    Confirmed,
}

impl BookingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingDate => "awaiting_date",
            Self::AwaitingSlotChoice => "awaiting_slot_choice",
            Self::Confirmed => "confirmed",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BookingState {
    #[default]
    Idle,
    AwaitingDate,
    AwaitingSlotChoice { date: NaiveDate, candidates: Vec<Slot> },
    Confirmed { appointment: Appointment },
}

impl BookingState {
    pub fn phase(&self) -> BookingPhase {
        match self {
            Self::Idle => BookingPhase::Idle,
            Self::AwaitingDate => BookingPhase::AwaitingDate,
            Self::AwaitingSlotChoice { .. } => BookingPhase::AwaitingSlotChoice,
            Self::Confirmed { .. } => BookingPhase::Confirmed,
        }
    }

    pub fn candidates(&self) -> &[Slot] {
        match self {
            Self::AwaitingSlotChoice { candidates, .. } => candidates,
            _ => &[],
        }
    }

    pub fn offers(&self, slot: &Slot) -> bool {
        self.candidates().iter().any(|candidate| candidate.key() == slot.key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    BookingRequested,
    /// A valid date was received and the allocator produced `candidates`.
    DateAccepted { date: NaiveDate, candidates: Vec<Slot> },
    /// The date could not be used; `reason` is shown to the user.
    DateRejected { reason: String },
    /// The store accepted the appointment for an offered slot.
    SlotClaimed { appointment: Appointment },
    /// Another session took `slot` first; `candidates` is the refreshed list.
    SlotLost { slot: Slot, candidates: Vec<Slot> },
    ChangeDateRequested,
    CancelRequested,
    /// Confirmation was delivered; the conversation returns to idle.
    Acknowledged,
    /// Input that did not match what the current step expects.
    Unrecognized,
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BookingRequested => "booking_requested",
            Self::DateAccepted { .. } => "date_accepted",
            Self::DateRejected { .. } => "date_rejected",
            Self::SlotClaimed { .. } => "slot_claimed",
            Self::SlotLost { .. } => "slot_lost",
            Self::ChangeDateRequested => "change_date_requested",
            Self::CancelRequested => "cancel_requested",
            Self::Acknowledged => "acknowledged",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingAction {
    PromptForDate,
    ExplainDateRejection { reason: String },
    AnnounceNoAvailability { date: NaiveDate },
    OfferSlots { date: NaiveDate, slots: Vec<Slot> },
    ConfirmAppointment { appointment: Appointment },
    AnnounceConflict { slot: Slot },
    AcknowledgeCancellation,
    /// The event did not fit the current step; repeat what is expected.
    RepromptExpectedStep,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub from: BookingPhase,
    pub to: BookingState,
    pub event: &'static str,
    pub accepted: bool,
    pub actions: Vec<BookingAction>,
}
