pub mod allocator;
pub mod store;

pub use allocator::{available_slots, BusinessHours, PastDatePolicy, SlotAllocator};
pub use store::{AppointmentStore, InsertOutcome};
