//! Interactive Prompt
//!
//! Asks the operator on the terminal. Without a terminal every question is
//! declined, so unattended runs never block.

use dialoguer::{Confirm, Select};
use is_terminal::IsTerminal;
use tracing::warn;

use crate::domain::ports::Prompt;

pub struct InteractivePrompt {
    terminal: bool,
}

impl InteractivePrompt {
    pub fn new() -> Self {
        Self {
            terminal: std::io::stdin().is_terminal(),
        }
    }
}

impl Default for InteractivePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for InteractivePrompt {
    fn confirm(&self, question: &str) -> bool {
        if !self.terminal {
            warn!(question, "no terminal, declining");
            return false;
        }
        Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .unwrap_or(false)
    }

    fn select(&self, question: &str, options: &[String]) -> Option<usize> {
        if !self.terminal || options.is_empty() {
            return None;
        }
        Select::new()
            .with_prompt(question)
            .items(options)
            .default(0)
            .interact_opt()
            .ok()
            .flatten()
    }

    fn is_interactive(&self) -> bool {
        self.terminal
    }
}
