//! A minimal publish/subscribe client core.
//!
//! A [`Context`] holds the process-scoped state (the transport connector and
//! the session id counter). Sessions are created from a context, connected to
//! a broker endpoint and then used to publish to topics or subscribe to topic
//! patterns. Inbound messages and session events are handed to callbacks on a
//! dedicated delivery thread per session.
//!
//! ```no_run
//! use pubsub_client::{
//!     message::{InboundMessage, Message},
//!     session::{ConfirmMode, SessionEvent},
//!     transport::tcp::TcpConnector,
//!     Context, Endpoint,
//! };
//!
//! let context = Context::new(TcpConnector::new());
//! let endpoint = Endpoint::from_args("localhost:55555", "default@default", "").unwrap();
//! let session = context
//!     .session(
//!         endpoint,
//!         Some(|message: InboundMessage| {
//!             println!("got {:?}", message.get_payload());
//!         }),
//!         Some(|e: SessionEvent| println!("event: {}", e)),
//!     )
//!     .unwrap();
//!
//! session
//!     .subscribe("tutorial/topic", ConfirmMode::WaitForConfirm)
//!     .unwrap();
//! session.wait_for_message(None).unwrap();
//! ```

pub mod context;
pub mod endpoint;
pub mod message;
pub mod session;
pub mod topic;
pub mod transport;
pub(crate) mod util;

#[cfg(feature = "cli")]
pub mod cli;

use enum_primitive::*;
use std::fmt;
use thiserror::Error;

pub use crate::context::Context;
pub use crate::endpoint::Endpoint;
pub use crate::session::{Session, SessionError};

enum_from_primitive! {
    /// Result code carried by broker replies.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    #[repr(u8)]
    pub enum ReturnCode {
        Ok = 0,
        Fail = 1,
        NotAuthorized = 2,
        UnknownVpn = 3,
        InvalidTopic = 4,
        NotFound = 5,
        Shutdown = 6,
    }
}

impl ReturnCode {
    pub fn from_raw(raw: u8) -> Self {
        Self::from_u8(raw).unwrap_or(Self::Fail)
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "Ok",
            Self::Fail => "Fail",
            Self::NotAuthorized => "Not Authorized",
            Self::UnknownVpn => "Unknown VPN",
            Self::InvalidTopic => "Invalid Topic",
            Self::NotFound => "Not Found",
            Self::Shutdown => "Shutdown",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised while validating configuration, before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} arg need to be set")]
    MissingRequiredArgs(String),
    #[error("{0} must not be empty")]
    EmptyField(String),
    #[error("credentials must be of the form <username>@<vpn> found {0:?}")]
    MalformedCredentials(String),
    #[error("{0} valid range is {1} found {2}")]
    InvalidRange(String, String, String),
    #[error("topic must not be empty")]
    EmptyTopic,
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("context has been shut down")]
    Shutdown,
}
