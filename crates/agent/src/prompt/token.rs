//! Token estimation utilities.
//!
//! Character heuristic: ~4 characters per token, plus a fixed per-message
//! overhead for role names and delimiters in the wire format.

use concierge_core::message::ConversationTurn;

/// Tokens charged per message on top of its text.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for the system message.
pub fn estimate_system_tokens(system_prompt: &str) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(system_prompt)
}

/// Estimate tokens for a single turn including per-message overhead.
pub fn estimate_turn_tokens(turn: &ConversationTurn) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&turn.text)
}

/// Estimate tokens for a slice of turns.
pub fn estimate_turns_tokens(turns: &[ConversationTurn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}
