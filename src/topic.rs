//! Topic pattern syntax and matching, as enforced by the bundled brokers.
//!
//! Topics are `/` separated levels. A subscription pattern may use two
//! wildcards:
//!
//! - `*` matches exactly one level. It may also end a level (`ab*`), in which
//!   case it matches any level starting with that prefix.
//! - `>` as the last level matches one or more remaining levels.
//!
//! Clients only check that a pattern is non-empty. Everything else is the
//! broker's call and comes back as a subscription error.

use std::fmt;

use thiserror::Error;

pub const MAX_TOPIC_LEN: usize = 250;

const LEVEL_SEPARATOR: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("topic is {0} bytes, limit is {MAX_TOPIC_LEN}")]
    TooLong(usize),
    #[error("topic has an empty level")]
    EmptyLevel,
    #[error("'*' may only end a level, found {0:?}")]
    MisplacedStar(String),
    #[error("'>' may only be the last level")]
    MisplacedGreaterThan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    // `*` or `prefix*`
    Prefix(String),
    // trailing `>`
    Rest,
}

/// A validated subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    levels: Vec<Level>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        validate_topic(raw)?;

        let parts: Vec<&str> = raw.split(LEVEL_SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let level = if part == ">" {
                if i != last {
                    return Err(TopicError::MisplacedGreaterThan);
                }
                Level::Rest
            } else if let Some(prefix) = part.strip_suffix('*') {
                if prefix.contains('*') {
                    return Err(TopicError::MisplacedStar(part.to_owned()));
                }
                Level::Prefix(prefix.to_owned())
            } else if part.contains('*') {
                return Err(TopicError::MisplacedStar(part.to_owned()));
            } else {
                Level::Literal(part.to_owned())
            };
            levels.push(level);
        }

        Ok(Self {
            raw: raw.to_owned(),
            levels,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a published topic falls under this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split(LEVEL_SEPARATOR);

        for level in &self.levels {
            match level {
                // needs at least one more level
                Level::Rest => return topic_levels.next().is_some(),
                Level::Prefix(prefix) => match topic_levels.next() {
                    Some(t) if t.starts_with(prefix.as_str()) => {}
                    _ => return false,
                },
                Level::Literal(lit) => match topic_levels.next() {
                    Some(t) if t == lit => {}
                    _ => return false,
                },
            }
        }

        topic_levels.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Checks the level structure shared by published topics and patterns.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.split(LEVEL_SEPARATOR).any(str::is_empty) {
        return Err(TopicError::EmptyLevel);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, topic: &str) -> bool {
        TopicPattern::parse(pattern).unwrap().matches(topic)
    }

    #[test]
    fn literal_patterns() {
        assert!(matches("tutorial/topic", "tutorial/topic"));
        assert!(!matches("tutorial/topic", "tutorial/topic/more"));
        assert!(!matches("tutorial/topic", "tutorial"));
        assert!(!matches("tutorial/topic", "tutorial/topics"));
    }

    #[test]
    fn star_matches_one_level() {
        assert!(matches("a/*/c", "a/b/c"));
        assert!(matches("a/*", "a/anything"));
        assert!(!matches("a/*", "a/b/c"));
        assert!(!matches("a/*/c", "a/c"));
    }

    #[test]
    fn prefix_star() {
        assert!(matches("a/bc*", "a/bcd"));
        assert!(matches("a/bc*", "a/bc"));
        assert!(!matches("a/bc*", "a/b"));
    }

    #[test]
    fn greater_than_matches_rest() {
        assert!(matches("a/>", "a/b"));
        assert!(matches("a/>", "a/b/c/d"));
        assert!(!matches("a/>", "a"));
        assert!(matches(">", "anything/at/all"));
    }

    #[test]
    fn it_rejects_bad_patterns() {
        assert_eq!(TopicPattern::parse(""), Err(TopicError::Empty));
        assert_eq!(TopicPattern::parse("a//b"), Err(TopicError::EmptyLevel));
        assert_eq!(TopicPattern::parse("/a"), Err(TopicError::EmptyLevel));
        assert_eq!(TopicPattern::parse("a/"), Err(TopicError::EmptyLevel));
        assert_eq!(
            TopicPattern::parse("a/>/b"),
            Err(TopicError::MisplacedGreaterThan)
        );
        assert_eq!(
            TopicPattern::parse("a/*b"),
            Err(TopicError::MisplacedStar("*b".to_owned()))
        );
        assert_eq!(
            TopicPattern::parse(&"a".repeat(MAX_TOPIC_LEN + 1)),
            Err(TopicError::TooLong(MAX_TOPIC_LEN + 1))
        );
    }

    #[test]
    fn greater_than_inside_level_is_literal() {
        assert!(matches("a/b>", "a/b>"));
        assert!(!matches("a/b>", "a/bc"));
    }
}
