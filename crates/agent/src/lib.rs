//! Conversation pipeline for the practice assistant.
//!
//! Each utterance flows through a fixed sequence:
//! 1. **Safety Gate** (`guardrails`) screens the text. An unreachable
//!    classifier lets it through and the turn is flagged as degraded.
//! 2. **Booking dialogue** (`conversation` + the core booking engine) takes
//!    over while a booking is in progress or when the user asks for one.
//! 3. **Knowledge Retriever** (`retrieval`) answers from the FAQ corpus when
//!    the best match clears the configured similarity threshold.
//! 4. **Fallback Responder** (`llm`) generates an answer otherwise.
//!
//! `runtime::ConversationRouter` owns that order and returns one reply plus
//! the side effects the calling layer must apply.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod retrieval;
pub mod runtime;

pub use guardrails::{SafetyGate, ToxicityClassifier, ToxicityVerdict};
pub use llm::{ChatCompletionsResponder, FallbackResponder};
pub use retrieval::{Embedder, FaqCorpus, KnowledgeRetriever};
pub use runtime::{ConversationRouter, RouterResponse, RouterSettings, SideEffect};
