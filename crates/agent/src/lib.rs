//! Message handling for Concierge.
//!
//! Every inbound message follows the same path:
//!
//! 1. **Receive** a message from a channel and validate it
//! 2. **Authorize** the sender against the directory cache
//! 3. **Build** the request: persona + profile, rolling history, new message
//! 4. **Complete** through the retrying completion client
//! 5. **Deliver** the answer, or a notice when anything above failed
//!
//! The [`Dispatcher`] queues messages per user so each user is served in
//! order while different users proceed in parallel.

pub mod commands;
pub mod dispatcher;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;

pub use commands::{Command, ComponentStatus, StatusReport};
pub use dispatcher::Dispatcher;
pub use pipeline::{MessagePipeline, PipelineOutcome, PipelineState};
pub use prompt::{AssembledPrompt, AssemblyMetadata, PromptAssembler};
pub use rate_limit::RateLimiter;
