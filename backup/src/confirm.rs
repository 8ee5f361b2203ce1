//! Operator confirmation.

use crate::Result;
use dialoguer::Confirm as Prompt;

/// Asks the operator a yes/no question.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Interactive prompt on the controlling terminal. Defaults to "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        Ok(Prompt::new().with_prompt(prompt).default(false).interact()?)
    }
}

/// Fixed answer, for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct Preset(pub bool);

impl Confirm for Preset {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        tracing::info!(prompt = %prompt, answer = self.0, "Answering prompt without a terminal");
        Ok(self.0)
    }
}
