use std::fmt;

use crate::ConfigError;

/// The topic a message is published to, or was received on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageDestination {
    pub(crate) dest: String,
}

impl MessageDestination {
    pub fn new<T: Into<String>>(topic: T) -> Result<Self, ConfigError> {
        let dest = topic.into();
        if dest.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        Ok(Self { dest })
    }

    // inbound topics come from the broker and are taken as is
    pub(crate) fn from_wire(dest: String) -> Self {
        Self { dest }
    }

    pub fn as_str(&self) -> &str {
        &self.dest
    }
}

impl fmt::Display for MessageDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dest)
    }
}

impl TryFrom<&str> for MessageDestination {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for MessageDestination {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
