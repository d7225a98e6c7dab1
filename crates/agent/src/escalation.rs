use concierge_core::config::{EscalationConfig, DEFAULT_TRIGGER_PHRASES};

/// Case-insensitive substring match against an ordered phrase list. The
/// first configured phrase found anywhere in the text wins; there is no
/// word-boundary check, so "agent" also matches "agents" and "reagent".
#[derive(Clone, Debug)]
pub struct EscalationDetector {
    phrases: Vec<String>,
    folded: Vec<String>,
}

impl Default for EscalationDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_PHRASES)
    }
}

impl EscalationDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(Into::into)
            .filter(|phrase: &String| !phrase.trim().is_empty())
            .collect();
        let folded = phrases.iter().map(|phrase| phrase.to_lowercase()).collect();
        Self { phrases, folded }
    }

    pub fn from_config(config: &EscalationConfig) -> Self {
        Self::new(config.trigger_phrases.iter().cloned())
    }

    /// The matched phrase, as configured, or `None`.
    pub fn detect(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.folded
            .iter()
            .position(|phrase| haystack.contains(phrase.as_str()))
            .map(|index| self.phrases[index].as_str())
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}
