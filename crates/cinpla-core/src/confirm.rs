//! Yes/no confirmation as an injected capability.

/// Answers a yes/no question. The CLI backs this with a terminal prompt;
/// pre-supplied answers and tests use [`Preset`].
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// A fixed answer, recording every prompt it was asked.
#[derive(Debug, Clone, Default)]
pub struct Preset {
    answer: bool,
    pub asked: Vec<String>,
}

impl Preset {
    pub fn yes() -> Self {
        Self {
            answer: true,
            asked: Vec::new(),
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            asked: Vec::new(),
        }
    }
}

impl Confirm for Preset {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.asked.push(prompt.to_string());
        self.answer
    }
}

/// Parse a typed answer. Empty input takes `default`; anything unrecognised
/// is `None` so the caller can ask again.
pub fn parse_answer(input: &str, default: bool) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
