//! Conversation memory for Concierge.
//!
//! History lives only in memory: a bounded rolling window per user,
//! dropped when the user goes idle.

pub mod store;

pub use store::{ConversationSession, ConversationStore, SessionGuard};
