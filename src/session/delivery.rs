use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};

use tracing::{debug, error, trace, warn};

use super::{SessionEvent, SessionState, Shared, SubscribeOutcome};
use crate::message::{InboundMessage, MessageDestination};
use crate::transport::TransportEvent;
use crate::util::lock;

pub(crate) enum Dispatch {
    Transport(TransportEvent),
    Event(SessionEvent),
    Shutdown,
}

/// Body of a session's delivery thread. Handlers only ever run here, one
/// item at a time, in the order the items were queued.
pub(super) fn run(shared: Arc<Shared>, receiver: mpsc::Receiver<Dispatch>) {
    for item in receiver {
        match item {
            Dispatch::Transport(event) => shared.on_transport_event(event),
            Dispatch::Event(event) => shared.notify(event),
            Dispatch::Shutdown => break,
        }
    }
    debug!(session = shared.id, "delivery thread stopped");
}

impl Shared {
    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { topic, payload } => self.deliver(topic, payload),
            TransportEvent::SubscriptionOk { pattern } => {
                debug!(session = self.id, %pattern, "subscription confirmed");
                self.resolve(&pattern, Ok(()));
                self.notify(SessionEvent::SubscriptionOk);
            }
            TransportEvent::SubscriptionError {
                pattern,
                code,
                reason,
            } => {
                warn!(session = self.id, %pattern, %code, %reason, "subscription rejected");
                lock(&self.inner)
                    .subscriptions
                    .retain(|s| s.pattern() != pattern);
                self.resolve(&pattern, Err((code, reason)));
                self.notify(SessionEvent::SubscriptionError);
            }
            TransportEvent::Down { reason } => self.on_down(reason),
        }
    }

    fn deliver(&self, topic: String, payload: Vec<u8>) {
        trace!(session = self.id, %topic, len = payload.len(), "message received");
        let destination = MessageDestination::from_wire(topic);

        {
            let mut handler = lock(&self.on_message);
            if let Some(handler) = handler.as_mut() {
                let message = InboundMessage::new(&destination, &payload);
                if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    error!(session = self.id, topic = %destination, "message handler panicked");
                }
            }
        }

        self.signal.notify();
    }

    fn on_down(&self, reason: String) {
        let connection = {
            let mut inner = lock(&self.inner);
            if inner.state != SessionState::Connected {
                debug!(session = self.id, %reason, state = %inner.state, "ignoring transport down");
                return;
            }
            warn!(session = self.id, %reason, "transport went down");
            inner.cancel_pending();
            let connection = inner.connection.take();
            self.transition(&mut inner, SessionState::Failed);
            connection
        };

        if let Some(connection) = connection {
            connection.close();
        }
    }

    fn resolve(&self, pattern: &str, outcome: SubscribeOutcome) {
        let waiters = lock(&self.inner).pending.remove(pattern);
        for waiter in waiters.into_iter().flatten() {
            waiter.complete(outcome.clone());
        }
    }

    pub(super) fn notify(&self, event: SessionEvent) {
        trace!(session = self.id, %event, "session event");
        let mut handler = lock(&self.on_event);
        if let Some(handler) = handler.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(session = self.id, %event, "event handler panicked");
            }
        }
    }
}
