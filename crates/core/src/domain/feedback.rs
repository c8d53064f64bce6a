use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub user_id: UserId,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl Feedback {
    /// Trims the text; blank feedback is rejected.
    pub fn new(user_id: UserId, text: &str) -> Result<Self, DomainError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::EmptyFeedback);
        }
        Ok(Self { user_id, text: text.to_string(), submitted_at: Utc::now() })
    }
}
