pub mod engine;
pub mod states;

pub use engine::BookingEngine;
pub use states::{BookingAction, BookingEvent, BookingPhase, BookingState, TransitionOutcome};
