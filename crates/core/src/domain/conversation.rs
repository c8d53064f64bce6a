use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One piece of user input, typed or transcribed. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
}

impl Utterance {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self::at(user_id, text, Utc::now())
    }

    pub fn at(user_id: UserId, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { text: text.into(), timestamp, user_id }
    }
}

/// Which branch of the router produced an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseRoute {
    SafetyRejection,
    Booking,
    Faq,
    Fallback,
    Degraded,
}

impl ResponseRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyRejection => "safety_rejection",
            Self::Booking => "booking",
            Self::Faq => "faq",
            Self::Fallback => "fallback",
            Self::Degraded => "degraded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "safety_rejection" => Some(Self::SafetyRejection),
            "booking" => Some(Self::Booking),
            "faq" => Some(Self::Faq),
            "fallback" => Some(Self::Fallback),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user_message: String,
    pub assistant_message: String,
    pub route: ResponseRoute,
    pub occurred_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
        route: ResponseRoute,
    ) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            route,
            occurred_at: Utc::now(),
        }
    }
}

/// One stored conversation as listed for a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub turn_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}
