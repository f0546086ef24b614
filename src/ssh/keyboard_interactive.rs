//! Keyboard-Interactive response policies
//!
//! Network-device firmware often issues nonstandard keyboard-interactive
//! prompts ("Passcode:", "Enter PASSWORD for admin", an empty string). The
//! default policy answers every prompt with the configured password; the
//! stricter policy answers only prompts that look like password prompts.

use serde::{Deserialize, Serialize};

use super::config::SecretString;

/// Keyboard-Interactive prompt from server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbiPrompt {
    /// The prompt text to display
    pub prompt: String,
    /// true = show input (echo), false = mask input (password-style)
    pub echo: bool,
}

/// Named prompt response policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptPolicy {
    /// Answer every prompt with the password, regardless of its text
    #[default]
    AnswerAll,
    /// Answer password-like prompts with the password, others with ""
    PasswordPromptsOnly,
}

impl PromptPolicy {
    /// Produce one response per prompt, in prompt order.
    pub fn respond(&self, prompts: &[KbiPrompt], password: Option<&SecretString>) -> Vec<String> {
        match self {
            PromptPolicy::AnswerAll => answer_all_with_password(prompts, password),
            PromptPolicy::PasswordPromptsOnly => answer_password_prompts(prompts, password),
        }
    }
}

fn secret_or_empty(password: Option<&SecretString>) -> String {
    password.map(|p| p.expose().to_string()).unwrap_or_default()
}

pub fn answer_all_with_password(prompts: &[KbiPrompt], password: Option<&SecretString>) -> Vec<String> {
    prompts.iter().map(|_| secret_or_empty(password)).collect()
}

pub fn answer_password_prompts(prompts: &[KbiPrompt], password: Option<&SecretString>) -> Vec<String> {
    prompts
        .iter()
        .map(|p| {
            let text = p.prompt.to_ascii_lowercase();
            if text.contains("password") || text.contains("passcode") {
                secret_or_empty(password)
            } else {
                String::new()
            }
        })
        .collect()
}
