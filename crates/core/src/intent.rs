//! Keyword intent routing.
//!
//! Messages are classified by ordered, case-sensitive substring checks. The
//! first rule whose keyword appears anywhere in the text wins, so a message
//! containing both "hello" and "help" is a greeting.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    Greeting,
    TransferRequest,
    HelpRequest,
    Unrecognized,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::TransferRequest => "transfer_request",
            Self::HelpRequest => "help_request",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Canned reply for this intent. `user_id` is interpolated verbatim into
    /// Slack's `<@USER>` mention syntax.
    pub fn reply_text(self, user_id: &str) -> String {
        match self {
            Self::Greeting => format!("Hello <@{user_id}>"),
            Self::TransferRequest => "transfering...".to_owned(),
            Self::HelpRequest => "I can help you".to_owned(),
            Self::Unrecognized => "I don't understand".to_owned(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub intent: Intent,
}

const DEFAULT_RULES: &[KeywordRule] = &[
    KeywordRule { keyword: "hello", intent: Intent::Greeting },
    KeywordRule { keyword: "transfer", intent: Intent::TransferRequest },
    KeywordRule { keyword: "help", intent: Intent::HelpRequest },
];

#[derive(Clone, Debug)]
pub struct IntentRouter {
    rules: &'static [KeywordRule],
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self { rules: DEFAULT_RULES }
    }
}

impl IntentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[KeywordRule] {
        self.rules
    }

    pub fn classify(&self, text: &str) -> Intent {
        self.rules
            .iter()
            .find(|rule| text.contains(rule.keyword))
            .map(|rule| rule.intent)
            .unwrap_or(Intent::Unrecognized)
    }
}

pub fn classify(text: &str) -> Intent {
    IntentRouter::default().classify(text)
}
