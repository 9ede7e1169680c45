//! Publishing and subscribing on a connected [`Session`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{Result, Session, SessionError};
use crate::message::{InboundMessage, Message, MessageDestination, OutboundMessage};
use crate::transport::TransportError;
use crate::util::{lock, Completion, SignalError, WaitError};
use crate::ConfigError;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ConfirmMode {
    /// Return as soon as the request has been handed to the transport.
    FireAndForget,
    /// Block until the broker acknowledges or rejects the subscription.
    WaitForConfirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pattern: String,
    confirm_mode: ConfirmMode,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn confirm_mode(&self) -> ConfirmMode {
        self.confirm_mode
    }
}

impl Session {
    /// Publishes a message. Succeeds once the transport accepted it, which
    /// says nothing about delivery to any subscriber.
    pub fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.send(message.get_destination(), message.get_payload())
    }

    pub fn publish_to<T, P>(&self, topic: T, payload: P) -> Result<()>
    where
        T: Into<String>,
        P: Into<Vec<u8>>,
    {
        let destination = MessageDestination::new(topic)?;
        self.send(&destination, &payload.into())
    }

    fn send(&self, destination: &MessageDestination, payload: &[u8]) -> Result<()> {
        let connection = lock(&self.shared.inner).connection()?;
        connection
            .send(destination.as_str(), payload)
            .map_err(|source| SessionError::Send {
                topic: destination.as_str().to_owned(),
                source,
            })?;
        trace!(session = self.id, topic = %destination, len = payload.len(), "message published");
        Ok(())
    }

    /// Registers interest in `pattern`.
    ///
    /// With [`ConfirmMode::WaitForConfirm`] this blocks until the broker
    /// answers or the subscription confirm timeout elapses.
    pub fn subscribe(&self, pattern: &str, confirm_mode: ConfirmMode) -> Result<()> {
        if pattern.is_empty() {
            return Err(ConfigError::EmptyTopic.into());
        }

        // the waiter goes in before the request, the answer may beat us back
        let (connection, waiter) = {
            let mut inner = lock(&self.shared.inner);
            let connection = inner.connection()?;
            let waiter = match confirm_mode {
                ConfirmMode::WaitForConfirm => {
                    let waiter = Arc::new(Completion::new());
                    inner
                        .pending
                        .entry(pattern.to_owned())
                        .or_default()
                        .push(waiter.clone());
                    Some(waiter)
                }
                ConfirmMode::FireAndForget => None,
            };
            inner.subscriptions.push(Subscription {
                pattern: pattern.to_owned(),
                confirm_mode,
            });
            (connection, waiter)
        };

        if let Err(source) = connection.subscribe(pattern) {
            self.forget_subscription(pattern, waiter.as_ref());
            return Err(SessionError::Subscribe {
                topic: pattern.to_owned(),
                source,
            });
        }
        debug!(session = self.id, %pattern, ?confirm_mode, "subscription requested");

        let Some(waiter) = waiter else {
            return Ok(());
        };
        match waiter.wait(Some(self.subconfirm_timeout)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err((code, reason))) => Err(SessionError::Subscribe {
                topic: pattern.to_owned(),
                source: TransportError::Rejected { code, reason },
            }),
            Err(WaitError::TimedOut) => {
                self.forget_waiter(pattern, &waiter);
                Err(SessionError::SubscribeTimeout {
                    topic: pattern.to_owned(),
                    timeout: self.subconfirm_timeout,
                })
            }
            Err(WaitError::Cancelled) => Err(SessionError::SessionClosed),
        }
    }

    pub fn unsubscribe(&self, pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Err(ConfigError::EmptyTopic.into());
        }

        let connection = {
            let mut inner = lock(&self.shared.inner);
            let connection = inner.connection()?;
            inner.subscriptions.retain(|s| s.pattern != pattern);
            connection
        };

        connection
            .unsubscribe(pattern)
            .map_err(|source| SessionError::Unsubscribe {
                topic: pattern.to_owned(),
                source,
            })?;
        debug!(session = self.id, %pattern, "unsubscribed");
        Ok(())
    }

    /// Subscriptions requested on this session and not rejected or removed
    /// since.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.shared.inner).subscriptions.clone()
    }

    /// Registers the message handler. A session has at most one, whether
    /// given to the builder or registered here.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        lock(&self.shared.inner).ensure_usable()?;
        if self
            .shared
            .has_message_handler
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::HandlerAlreadyRegistered);
        }
        *lock(&self.shared.on_message) = Some(Box::new(handler));
        Ok(())
    }

    /// Blocks until the next inbound message has been handed to the handler.
    ///
    /// Messages that arrived since the previous wait count, so a message
    /// delivered between `subscribe` and this call is not missed. Only one
    /// thread may wait at a time.
    pub fn wait_for_message(&self, timeout: Option<Duration>) -> Result<()> {
        lock(&self.shared.inner).ensure_usable()?;
        self.shared.signal.wait(timeout).map_err(|e| match e {
            SignalError::Busy => SessionError::WaiterBusy,
            SignalError::TimedOut => SessionError::WaitTimeout(timeout.unwrap_or_default()),
            SignalError::Closed => SessionError::SessionClosed,
        })
    }

    fn forget_waiter(&self, pattern: &str, waiter: &Arc<Completion<super::SubscribeOutcome>>) {
        let mut inner = lock(&self.shared.inner);
        if let Some(waiters) = inner.pending.get_mut(pattern) {
            waiters.retain(|w| !Arc::ptr_eq(w, waiter));
            if waiters.is_empty() {
                inner.pending.remove(pattern);
            }
        }
    }

    fn forget_subscription(
        &self,
        pattern: &str,
        waiter: Option<&Arc<Completion<super::SubscribeOutcome>>>,
    ) {
        if let Some(waiter) = waiter {
            self.forget_waiter(pattern, waiter);
        }
        let mut inner = lock(&self.shared.inner);
        if let Some(index) = inner.subscriptions.iter().rposition(|s| s.pattern == pattern) {
            inner.subscriptions.remove(index);
        }
    }
}
