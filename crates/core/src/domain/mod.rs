pub mod conversation;
pub mod faq;
pub mod feedback;
pub mod profile;
pub mod schedule;
pub mod session;
