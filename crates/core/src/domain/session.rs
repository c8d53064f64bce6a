use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ChatTurn, SessionId, UserId};
use crate::flows::states::BookingState;

/// Upper bound on turns retained in memory for one session.
pub const MAX_RETAINED_TURNS: usize = 50;

/// Per-conversation state handed to the router by the calling layer.
///
/// The caller owns the lifecycle: it creates one per session, passes it by
/// `&mut` for each utterance, and calls [`SessionContext::reset`] on logout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub booking: BookingState,
    history: Vec<ChatTurn>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, user_id: UserId) -> Self {
        Self { session_id, user_id, booking: BookingState::Idle, history: Vec::new() }
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// The most recent `limit` turns, oldest first.
    pub fn recent_turns(&self, limit: usize) -> &[ChatTurn] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    pub fn record_turn(&mut self, turn: ChatTurn) {
        self.history.push(turn);
        if self.history.len() > MAX_RETAINED_TURNS {
            let overflow = self.history.len() - MAX_RETAINED_TURNS;
            self.history.drain(..overflow);
        }
    }

    pub fn is_booking(&self) -> bool {
        !matches!(self.booking, BookingState::Idle)
    }

    /// Abandons any in-flight booking and forgets the conversation.
    pub fn reset(&mut self) {
        self.booking = BookingState::Idle;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::conversation::{ChatTurn, ResponseRoute, SessionId, UserId};
    use crate::flows::states::BookingState;

    use super::{SessionContext, MAX_RETAINED_TURNS};

    fn session() -> SessionContext {
        SessionContext::new(SessionId("s-1".to_string()), UserId("u-1".to_string()))
    }

    #[test]
    fn recent_turns_returns_tail_in_order() {
        let mut session = session();
        for index in 0..5 {
            session.record_turn(ChatTurn::new(format!("q{index}"), "a", ResponseRoute::Fallback));
        }

        let recent = session.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_message, "q3");
        assert_eq!(recent[1].user_message, "q4");
        assert_eq!(session.recent_turns(100).len(), 5);
    }

    #[test]
    fn history_is_bounded() {
        let mut session = session();
        for index in 0..(MAX_RETAINED_TURNS + 7) {
            session.record_turn(ChatTurn::new(format!("q{index}"), "a", ResponseRoute::Faq));
        }

        assert_eq!(session.history().len(), MAX_RETAINED_TURNS);
        assert_eq!(session.history()[0].user_message, "q7");
    }

    #[test]
    fn reset_abandons_booking_and_history() {
        let mut session = session();
        session.booking = BookingState::AwaitingDate;
        session.record_turn(ChatTurn::new("book", "which date?", ResponseRoute::Booking));
        assert!(session.is_booking());

        session.reset();

        assert!(!session.is_booking());
        assert!(session.history().is_empty());
    }
}
