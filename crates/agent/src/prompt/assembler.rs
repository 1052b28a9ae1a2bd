//! Builds a [`CompletionRequest`] from the persona, the session history and
//! the new user message.
//!
//! # Determinism
//!
//! Assembly is pure: identical inputs always produce identical requests.
//! No clock or random state is read here; timestamps come in on the turns.

use crate::prompt::token;
use concierge_core::message::ConversationTurn;
use concierge_core::provider::CompletionRequest;
use tracing::{debug, warn};

/// Counters describing one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyMetadata {
    /// Estimated input tokens of the request as built.
    pub total_tokens: usize,
    /// The configured input budget.
    pub budget: usize,
    /// History turns kept.
    pub history_included: usize,
    /// History turns dropped to fit the budget.
    pub history_dropped: usize,
    /// True when the system prompt and new message alone exceed the budget.
    pub over_budget: bool,
}

/// An assembled request plus its accounting.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub request: CompletionRequest,
    pub metadata: AssemblyMetadata,
}

/// Assembles completion requests under an input token budget.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    model: String,
    max_tokens: u32,
    temperature: f32,
    input_token_budget: usize,
}

impl PromptAssembler {
    pub fn new(model: impl Into<String>, max_tokens: u32, temperature: f32, input_token_budget: usize) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature,
            input_token_budget,
        }
    }

    pub fn from_config(config: &concierge_config::AppConfig) -> Self {
        Self::new(
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.conversation.input_token_budget,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input_token_budget(&self) -> usize {
        self.input_token_budget
    }

    /// Build the request for `new_message` on top of `history`.
    pub fn build(
        &self,
        system_prompt: &str,
        history: &[ConversationTurn],
        new_message: &ConversationTurn,
    ) -> CompletionRequest {
        self.assemble(system_prompt, history, new_message).request
    }

    /// Like [`build`](Self::build), also returning what was kept and dropped.
    ///
    /// The system prompt and the new message are always included. History
    /// is walked newest to oldest and stops at the first turn that does not
    /// fit, so whatever survives is a contiguous recent suffix.
    pub fn assemble(
        &self,
        system_prompt: &str,
        history: &[ConversationTurn],
        new_message: &ConversationTurn,
    ) -> AssembledPrompt {
        let reserved = token::estimate_system_tokens(system_prompt) + token::estimate_turn_tokens(new_message);
        let over_budget = reserved > self.input_token_budget;
        let mut remaining = self.input_token_budget.saturating_sub(reserved);

        let mut kept: Vec<ConversationTurn> = Vec::with_capacity(history.len() + 1);
        if !over_budget {
            for turn in history.iter().rev() {
                let cost = token::estimate_turn_tokens(turn);
                if cost > remaining {
                    break;
                }
                remaining -= cost;
                kept.push(turn.clone());
            }
        }
        kept.reverse();

        let history_included = kept.len();
        let history_dropped = history.len() - history_included;
        let total_tokens = reserved + token::estimate_turns_tokens(&kept);
        kept.push(new_message.clone());

        if over_budget {
            warn!(
                estimated = reserved,
                budget = self.input_token_budget,
                "System prompt and new message exceed the input budget, sending anyway"
            );
        } else if history_dropped > 0 {
            debug!(history_dropped, history_included, "Trimmed conversation history to fit budget");
        }

        AssembledPrompt {
            request: CompletionRequest {
                model: self.model.clone(),
                system_prompt: system_prompt.to_string(),
                turns: kept,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            },
            metadata: AssemblyMetadata {
                total_tokens,
                budget: self.input_token_budget,
                history_included,
                history_dropped,
                over_budget,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use concierge_core::message::Role;

    fn turn(role: Role, text: &str, secs: i64) -> ConversationTurn {
        ConversationTurn::new(role, text, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    fn history(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                // 16 chars → 4 tokens + 4 overhead = 8 per turn
                turn(role, &format!("message number {:02}", i)[..16], i as i64)
            })
            .collect()
    }

    fn assembler(budget: usize) -> PromptAssembler {
        PromptAssembler::new("gpt-4o-mini", 500, 0.7, budget)
    }

    #[test]
    fn system_first_new_message_last() {
        let a = assembler(10_000);
        let new = turn(Role::User, "what now?", 100);
        let req = a.build("You are helpful.", &history(4), &new);

        assert_eq!(req.system_prompt, "You are helpful.");
        assert_eq!(req.turns.len(), 5);
        assert_eq!(req.turns.last(), Some(&new));
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 500);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn history_stays_chronological() {
        let a = assembler(10_000);
        let req = a.build("sys", &history(6), &turn(Role::User, "next", 100));
        let stamps: Vec<_> = req.turns.iter().map(|t| t.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn oldest_turns_dropped_first() {
        // system "sys" = 1 + 4 = 5, new "next" = 1 + 4 = 5, so 10 reserved.
        // 26 remaining fits three 8-token turns.
        let a = assembler(36);
        let hist = history(6);
        let assembled = a.assemble("sys", &hist, &turn(Role::User, "next", 100));

        assert_eq!(assembled.metadata.history_included, 3);
        assert_eq!(assembled.metadata.history_dropped, 3);
        assert!(!assembled.metadata.over_budget);
        assert_eq!(&assembled.request.turns[..3], &hist[3..]);
        assert!(assembled.metadata.total_tokens <= 36);
    }

    #[test]
    fn oversized_prompt_still_sent() {
        let a = assembler(5);
        let system = "x".repeat(400);
        let new = turn(Role::User, "hello there", 100);
        let assembled = a.assemble(&system, &history(4), &new);

        assert!(assembled.metadata.over_budget);
        assert_eq!(assembled.metadata.history_included, 0);
        assert_eq!(assembled.request.system_prompt, system);
        assert_eq!(assembled.request.turns, vec![new]);
    }

    #[test]
    fn history_cut_is_contiguous() {
        // A large old turn must not let even older small turns back in.
        let a = assembler(40);
        let hist = vec![
            turn(Role::User, "tiny", 0),
            turn(Role::Assistant, &"y".repeat(200), 1),
            turn(Role::User, "small", 2),
        ];
        let req = a.build("sys", &hist, &turn(Role::User, "next", 3));
        assert_eq!(req.turns.len(), 2);
        assert_eq!(req.turns[0].text, "small");
    }

    #[test]
    fn build_is_deterministic() {
        let a = assembler(30);
        let hist = history(8);
        let new = turn(Role::User, "again", 100);
        let first = a.build("persona", &hist, &new);
        let second = a.build("persona", &hist, &new);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_history() {
        let a = assembler(100);
        let assembled = a.assemble("sys", &[], &turn(Role::User, "hi", 0));
        assert_eq!(assembled.request.turns.len(), 1);
        assert_eq!(assembled.metadata.history_dropped, 0);
        assert_eq!(assembled.metadata.total_tokens, 10);
    }

    #[test]
    fn from_config_uses_conversation_budget() {
        let config = concierge_config::AppConfig::default();
        let a = PromptAssembler::from_config(&config);
        assert_eq!(a.model(), config.model);
        assert_eq!(a.input_token_budget(), config.conversation.input_token_budget);
    }
}
