//! Prompt Port
//!
//! Decision points where the engine blocks on the operator: applying a plan,
//! overwriting a remotely modified object, accepting target-side drift,
//! confirming a manually resolved conflict, picking one of several matches.
//! The engine decides *that* a decision is needed, never how it is asked.

/// Trait for answering the engine's questions.
///
/// Implementations can be:
/// - `InteractivePrompt`: asks on the terminal
/// - `AutoApprove`: answers yes, picks the first option
/// - `AutoDecline`: answers no, picks nothing
pub trait Prompt: Send + Sync {
    /// Ask a yes/no question.
    fn confirm(&self, question: &str) -> bool;

    /// Pick one of `options`; `None` means no choice was made.
    fn select(&self, question: &str, options: &[String]) -> Option<usize>;

    /// Whether answering requires a human (affects scheduling of prompting calls).
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Prompt that approves everything.
///
/// Use this when `--yes` is passed.
pub struct AutoApprove;

impl Prompt for AutoApprove {
    fn confirm(&self, _question: &str) -> bool {
        true
    }

    fn select(&self, _question: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// Prompt that declines everything.
///
/// Use this in non-interactive runs without `--yes`.
pub struct AutoDecline;

impl Prompt for AutoDecline {
    fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn select(&self, _question: &str, _options: &[String]) -> Option<usize> {
        None
    }
}
