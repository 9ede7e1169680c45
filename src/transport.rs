//! The broker connection capability a session runs over.
//!
//! A [`Connector`] opens a [`Connection`] to an endpoint. Everything the
//! broker pushes back (messages, subscription confirmations, connection
//! loss) goes through the [`InboundSink`] handed to `open`, which forwards
//! it to the owning session's delivery thread.

pub(crate) mod frame;
pub mod loopback;
pub mod tcp;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::{Endpoint, ReturnCode};

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker rejected the request. return code: {code} reason: {reason}")]
    Rejected { code: ReturnCode, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection is closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn rejected<R: Into<String>>(code: ReturnCode, reason: R) -> Self {
        Self::Rejected {
            code,
            reason: reason.into(),
        }
    }
}

/// Per-connection settings that the transport honours.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_name: String,
    pub application_description: Option<String>,
    pub connect_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_name: String::new(),
            application_description: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            tcp_nodelay: true,
        }
    }
}

pub trait Connector: Send + Sync {
    /// Opens a connection and authenticates. Blocks until the broker has
    /// accepted or refused the client.
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        sink: InboundSink,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

pub trait Connection: Send + Sync {
    /// Hands a message to the transport. Returning `Ok` says nothing about
    /// whether any subscriber received it.
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Sends a subscription request. The broker's answer arrives later as a
    /// [`TransportEvent::SubscriptionOk`] or [`TransportEvent::SubscriptionError`].
    fn subscribe(&self, pattern: &str) -> Result<(), TransportError>;

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Tears the connection down. Must be idempotent.
    fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message {
        topic: String,
        payload: Vec<u8>,
    },
    SubscriptionOk {
        pattern: String,
    },
    SubscriptionError {
        pattern: String,
        code: ReturnCode,
        reason: String,
    },
    Down {
        reason: String,
    },
}

/// The deliver callback of a connection.
///
/// Every method returns false once the receiving side is gone, which lets a
/// broker drop clients that will never read again.
#[derive(Clone)]
pub struct InboundSink {
    deliver: Arc<dyn Fn(TransportEvent) -> bool + Send + Sync>,
}

impl InboundSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn send_event(&self, event: TransportEvent) -> bool {
        (self.deliver)(event)
    }

    pub fn deliver(&self, topic: String, payload: Vec<u8>) -> bool {
        self.send_event(TransportEvent::Message { topic, payload })
    }

    pub fn subscription_ok(&self, pattern: String) -> bool {
        self.send_event(TransportEvent::SubscriptionOk { pattern })
    }

    pub fn subscription_error<R: Into<String>>(
        &self,
        pattern: String,
        code: ReturnCode,
        reason: R,
    ) -> bool {
        self.send_event(TransportEvent::SubscriptionError {
            pattern,
            code,
            reason: reason.into(),
        })
    }

    pub fn down<R: Into<String>>(&self, reason: R) -> bool {
        self.send_event(TransportEvent::Down {
            reason: reason.into(),
        })
    }
}

impl fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::mpsc;

    /// A sink that forwards everything to a channel the test can read.
    pub(crate) fn channel_sink() -> (InboundSink, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = InboundSink::new(move |event| tx.send(event).is_ok());
        (sink, rx)
    }
}
