//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge chat
//! assistant. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod directory;
pub mod persona;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, DirectoryError, Error, ProviderError};
pub use message::{ConversationTurn, Role, UserId};
pub use provider::{
    CompletionFailure, CompletionRequest, CompletionResponse, CompletionResult, FailureKind,
    Provider, Usage,
};
pub use channel::{Channel, InboundMessage};
pub use directory::{AuthorizationRecord, Directory, DirectoryEntry};
pub use persona::{Persona, PersonaSource};
pub use event::{DomainEvent, EventBus};
