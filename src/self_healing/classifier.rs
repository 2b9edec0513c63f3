//! Failure classification.
//!
//! Structured [`GuardError`] variants map straight to a category. Variants
//! that only carry collaborator text go through an explicit, ordered rule
//! table: first match wins, no match is `Unknown`. The text rules are a
//! known heuristic over third-party wording and are kept as data so they can
//! be swapped without touching callers.

use crate::errors::GuardError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    SessionInvalid,
    ResourceExhaustion,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        Self::Network,
        Self::Timeout,
        Self::SessionInvalid,
        Self::ResourceExhaustion,
        Self::Unknown,
    ];
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::SessionInvalid => "session_invalid",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Case-insensitive equality against the failure's type name
    TypeName(String),
    /// Case-insensitive substring of the message
    Contains(String),
}

impl Matcher {
    fn matches(&self, type_name: &str, message: &str) -> bool {
        match self {
            Self::TypeName(name) => type_name.eq_ignore_ascii_case(name),
            Self::Contains(needle) => message.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub category: ErrorCategory,
}

enum Kind {
    Type,
    Text,
}

/// Built-in rules, in priority order. Session rules come first so that
/// "session timed out" style messages are not read as plain timeouts.
const DEFAULT_RULES: &[(Kind, &str, ErrorCategory)] = &[
    (Kind::Type, "InvalidSessionIdException", ErrorCategory::SessionInvalid),
    (Kind::Type, "NoSuchSessionException", ErrorCategory::SessionInvalid),
    (Kind::Text, "invalid session id", ErrorCategory::SessionInvalid),
    (Kind::Text, "no such session", ErrorCategory::SessionInvalid),
    (Kind::Text, "session not found", ErrorCategory::SessionInvalid),
    (Kind::Text, "session is either terminated", ErrorCategory::SessionInvalid),
    (Kind::Text, "session expired", ErrorCategory::SessionInvalid),
    (Kind::Type, "TimeoutError", ErrorCategory::Timeout),
    (Kind::Type, "TimeoutException", ErrorCategory::Timeout),
    (Kind::Text, "timed out", ErrorCategory::Timeout),
    (Kind::Text, "timeout", ErrorCategory::Timeout),
    (Kind::Text, "deadline exceeded", ErrorCategory::Timeout),
    (Kind::Type, "NetworkError", ErrorCategory::Network),
    (Kind::Type, "ConnectionError", ErrorCategory::Network),
    (Kind::Type, "ConnectionRefusedError", ErrorCategory::Network),
    (Kind::Text, "connection refused", ErrorCategory::Network),
    (Kind::Text, "connection reset", ErrorCategory::Network),
    (Kind::Text, "connection aborted", ErrorCategory::Network),
    (Kind::Text, "broken pipe", ErrorCategory::Network),
    (Kind::Text, "unreachable", ErrorCategory::Network),
    (Kind::Text, "no route to host", ErrorCategory::Network),
    (Kind::Text, "failed to connect", ErrorCategory::Network),
    (Kind::Text, "cannot connect", ErrorCategory::Network),
    (Kind::Type, "ResourceExhaustedError", ErrorCategory::ResourceExhaustion),
    (Kind::Type, "MemoryError", ErrorCategory::ResourceExhaustion),
    (Kind::Text, "out of memory", ErrorCategory::ResourceExhaustion),
    (Kind::Text, "no space left", ErrorCategory::ResourceExhaustion),
    (Kind::Text, "too many open files", ErrorCategory::ResourceExhaustion),
    (Kind::Text, "resource exhausted", ErrorCategory::ResourceExhaustion),
];

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<Rule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(kind, pattern, category)| Rule {
                matcher: match kind {
                    Kind::Type => Matcher::TypeName(pattern.to_string()),
                    Kind::Text => Matcher::Contains(pattern.to_lowercase()),
                },
                category: *category,
            })
            .collect();
        Self { rules }
    }
}

/// Messages are lowercased before matching, so needles are too.
fn normalize(matcher: Matcher) -> Matcher {
    match matcher {
        Matcher::Contains(s) => Matcher::Contains(s.to_lowercase()),
        other => other,
    }
}

impl ErrorClassifier {
    /// Classifier with no rules; everything text-only is `Unknown`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| Rule {
                matcher: normalize(rule.matcher),
                category: rule.category,
            })
            .collect();
        Self { rules }
    }

    /// Append a rule at the lowest priority.
    pub fn push_rule(&mut self, matcher: Matcher, category: ErrorCategory) {
        self.rules.push(Rule {
            matcher: normalize(matcher),
            category,
        });
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Table lookup over a type name and message.
    pub fn classify(&self, type_name: &str, message: &str) -> ErrorCategory {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(type_name, &message))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn classify_error(&self, error: &GuardError) -> ErrorCategory {
        match error {
            GuardError::Network(_) => ErrorCategory::Network,
            GuardError::Timeout { .. } => ErrorCategory::Timeout,
            GuardError::SessionInvalid(_) => ErrorCategory::SessionInvalid,
            GuardError::ResourceExhausted(_) => ErrorCategory::ResourceExhaustion,
            other => self.classify(other.type_name(), &other.message()),
        }
    }
}
