use std::time::Duration;

use thiserror::Error;

use super::SessionState;
use crate::transport::TransportError;
use crate::{ConfigError, ContextError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session received invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("session failed to initialize: {0}")]
    InitializationFailure(String),
    #[error("session failed to connect: {0}")]
    Connect(#[source] TransportError),
    #[error("session is not connected. state: {0}")]
    NotConnected(SessionState),
    #[error("session failed to send message on topic: {topic}. {source}")]
    Send {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("session failed to subscribe on topic: {topic}. {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("session failed to unsubscribe on topic: {topic}. {source}")]
    Unsubscribe {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("subscription on topic: {topic} was not confirmed within {timeout:?}")]
    SubscribeTimeout { topic: String, timeout: Duration },
    #[error("session was closed while waiting")]
    SessionClosed,
    #[error("session has been closed")]
    UseAfterClose,
    #[error("operation is not valid in state: {0}")]
    InvalidState(SessionState),
    #[error("a message handler is already registered")]
    HandlerAlreadyRegistered,
    #[error("another thread is already waiting for a message")]
    WaiterBusy,
    #[error("no message received within {0:?}")]
    WaitTimeout(Duration),
}
