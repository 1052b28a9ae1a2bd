//! Persona: the assistant's fixed system prompt.
//!
//! Loading follows a short precedence list (first match wins):
//!
//! 1. **Override**: an inline prompt from configuration
//! 2. **Prompt file**: a markdown/text file from configuration
//! 3. **Built-in default**: hardcoded fallback persona
//!
//! A missing or empty prompt file is skipped with a warning. The base prompt
//! is then personalized per user by appending the directory profile.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::directory::AuthorizationRecord;

/// Where the persona text comes from.
#[derive(Debug, Clone, Default)]
pub struct PersonaSource {
    /// Optional prompt file (e.g., `~/.concierge/persona.md`)
    pub prompt_file: Option<PathBuf>,

    /// Optional inline prompt (skips file loading)
    pub system_prompt_override: Option<String>,
}

/// The assistant's persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Base system prompt, never truncated
    pub system_prompt: String,

    /// Where the prompt was loaded from (for diagnostics)
    pub source: String,
}

impl Persona {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            source: "<inline>".into(),
        }
    }

    /// The built-in persona used when nothing is configured.
    pub fn default_persona() -> Self {
        Self {
            system_prompt: concat!(
                "You are a General Manager assistant focused on outcomes and accountability. ",
                "Give clear, specific, actionable guidance. ",
                "Adapt your leadership style to the person you are talking to. ",
                "Keep responses concise but comprehensive.",
            )
            .into(),
            source: "<built-in>".into(),
        }
    }

    /// Load the persona following the precedence list.
    pub fn load(source: &PersonaSource) -> Self {
        if let Some(prompt) = &source.system_prompt_override {
            if !prompt.trim().is_empty() {
                debug!("Using system prompt override, skipping file loading");
                return Self {
                    system_prompt: prompt.trim().to_string(),
                    source: "<override>".into(),
                };
            }
        }

        if let Some(path) = &source.prompt_file {
            match Self::read_prompt_file(path) {
                Some(prompt) => {
                    debug!(file = %path.display(), prompt_len = prompt.len(), "Loaded persona file");
                    return Self {
                        system_prompt: prompt,
                        source: path.display().to_string(),
                    };
                }
                None => {
                    warn!(file = %path.display(), "Persona file missing or empty, using built-in persona");
                }
            }
        }

        Self::default_persona()
    }

    fn read_prompt_file(path: &Path) -> Option<String> {
        let content = std::fs::read_to_string(path).ok()?;
        let trimmed = content.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// The system prompt personalized for one user.
    ///
    /// Format:
    /// ```text
    /// {base persona}
    ///
    /// EMPLOYEE PROFILE DATA:
    /// {profile lines, or a note that none is available}
    ///
    /// Instructions:
    /// - ...
    /// ```
    pub fn system_prompt_for(&self, record: &AuthorizationRecord) -> String {
        let mut prompt = String::with_capacity(self.system_prompt.len() + record.profile.len() + 512);
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\nEMPLOYEE PROFILE DATA:\n");

        let mut has_profile = false;
        if let Some(name) = &record.display_name {
            prompt.push_str(&format!("Name: {name}\n"));
            has_profile = true;
        }
        if let Some(role) = &record.role {
            prompt.push_str(&format!("Role: {role}\n"));
            has_profile = true;
        }
        if !record.profile.trim().is_empty() {
            prompt.push_str(record.profile.trim());
            prompt.push('\n');
            has_profile = true;
        }
        if !has_profile {
            prompt.push_str("No specific profile data available.\n");
        }

        prompt.push_str(concat!(
            "\nInstructions:\n",
            "- Use the employee profile data to personalize your response style and approach\n",
            "- Reference their personality type, role, goals, or other relevant attributes when appropriate\n",
            "- Maintain conversation continuity using the history provided\n",
            "- Be specific and actionable in your guidance\n",
            "- Keep responses concise but comprehensive\n",
        ));
        prompt
    }

    /// Rough token estimate of the base prompt (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.system_prompt.len().div_ceil(4)
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::default_persona()
    }
}
