//! Broker topic naming
//!
//! Solution updates for a contest are published on `<prefix>-<contest id>-solutions`,
//! e.g. `scope-7-solutions`. Topics are dot-separated segments and each
//! segment must match: [a-zA-Z0-9_-]+
//!
//! Wildcards are never valid here: a session subscribes to exactly one topic.

use std::fmt;
use thiserror::Error;

/// Prefix used when none is configured
pub const DEFAULT_TOPIC_PREFIX: &str = "scope";

/// Suffix shared by every solutions topic
const SOLUTIONS_SUFFIX: &str = "solutions";

/// Valid characters for a topic segment
fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validate a single segment
fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_segment_char)
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    Empty,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidSegment(String),

    #[error("wildcards are not allowed in topic names")]
    Wildcard,

    #[error("empty segment in topic name")]
    EmptySegment,
}

/// A validated, concrete broker topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    name: String,
}

impl Topic {
    /// Parse and validate a topic name
    pub fn parse(name: &str) -> Result<Self, TopicError> {
        if name.is_empty() {
            return Err(TopicError::Empty);
        }

        for part in name.split('.') {
            if part.is_empty() {
                return Err(TopicError::EmptySegment);
            }

            if part == "*" || part == ">" {
                return Err(TopicError::Wildcard);
            }

            if !is_valid_segment(part) {
                return Err(TopicError::InvalidSegment(part.to_string()));
            }
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Topic carrying solution updates for one contest
    pub fn solutions(prefix: &str, scope_id: i32) -> Result<Self, TopicError> {
        Self::parse(&format!("{}-{}-{}", prefix, scope_id, SOLUTIONS_SUFFIX))
    }

    /// Get the topic name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
