//! Prompt implementations

mod interactive;

pub use interactive::InteractivePrompt;
