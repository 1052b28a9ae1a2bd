//! Prompt assembly.
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | 1. System | Persona + directory profile | Never trimmed |
//! | 2. Conversation History | Rolling session | Oldest turns dropped |
//! | 3. New user message | Inbound text | Never trimmed |

pub mod assembler;
pub mod token;

pub use assembler::{AssembledPrompt, AssemblyMetadata, PromptAssembler};
