pub mod builder;
mod delivery;
mod error;
mod event;
pub mod topic;

pub use builder::SessionBuilder;
pub use error::SessionError;
pub use event::{SessionEvent, SessionState};
pub use topic::{ConfirmMode, Subscription};

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::message::InboundMessage;
use crate::transport::{ConnectOptions, Connection, InboundSink};
use crate::util::{lock, Completion, MessageSignal};
use crate::{Context, Endpoint, ReturnCode};
use delivery::Dispatch;

type Result<T> = std::result::Result<T, SessionError>;

pub(crate) type MessageHandler = Box<dyn for<'a> FnMut(InboundMessage<'a>) + Send>;
pub(crate) type EventHandler = Box<dyn FnMut(SessionEvent) + Send>;

/// The broker's answer to a subscription request.
type SubscribeOutcome = std::result::Result<(), (ReturnCode, String)>;

pub(crate) struct Inner {
    state: SessionState,
    // set by close, after which only disconnect, close and state are allowed
    released: bool,
    connection: Option<Arc<dyn Connection>>,
    subscriptions: Vec<Subscription>,
    pending: HashMap<String, Vec<Arc<Completion<SubscribeOutcome>>>>,
}

impl Inner {
    fn ensure_usable(&self) -> Result<()> {
        if self.released {
            return Err(SessionError::UseAfterClose);
        }
        Ok(())
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.ensure_usable()?;
        match (&self.connection, self.state) {
            (Some(connection), SessionState::Connected) => Ok(connection.clone()),
            (_, state) => Err(SessionError::NotConnected(state)),
        }
    }

    fn cancel_pending(&mut self) {
        for waiter in mem::take(&mut self.pending).into_values().flatten() {
            waiter.cancel();
        }
    }
}

/// State shared between a [`Session`] handle, its delivery thread and the
/// owning context.
pub(crate) struct Shared {
    id: u64,
    inner: Mutex<Inner>,
    on_message: Mutex<Option<MessageHandler>>,
    has_message_handler: AtomicBool,
    on_event: Mutex<Option<EventHandler>>,
    signal: MessageSignal,
    dispatch: mpsc::Sender<Dispatch>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Moves the session to `to` and raises the event that goes with the
    /// transition. Callers hold the state lock.
    fn transition(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(session = self.id, %from, %to, "session state changed");

        let event = match (from, to) {
            (_, SessionState::Connected) => Some(SessionEvent::UpNotice),
            (SessionState::Connecting, SessionState::Failed) => {
                Some(SessionEvent::ConnectFailedError)
            }
            (_, SessionState::Failed) => Some(SessionEvent::DownError),
            (_, SessionState::Closed) => Some(SessionEvent::DisconnectedNotice),
            _ => None,
        };
        if let Some(event) = event {
            self.emit(event);
        }
        if to.is_terminal() {
            // no more messages can arrive, release any blocked wait
            self.signal.close();
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.dispatch.send(Dispatch::Event(event)).is_err() {
            debug!(session = self.id, %event, "delivery thread gone, dropping event");
        }
    }

    fn sink(&self) -> InboundSink {
        let dispatch = self.dispatch.clone();
        InboundSink::new(move |event| dispatch.send(Dispatch::Transport(event)).is_ok())
    }

    fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    fn disconnect(&self) {
        let connection = {
            let mut inner = lock(&self.inner);
            if inner.state.is_terminal() {
                return;
            }
            self.transition(&mut inner, SessionState::Disconnecting);
            inner.cancel_pending();
            inner.connection.take()
        };

        if let Some(connection) = connection {
            connection.close();
        }

        let mut inner = lock(&self.inner);
        inner.subscriptions.clear();
        self.transition(&mut inner, SessionState::Closed);
        info!(session = self.id, "session disconnected");
    }

    pub(crate) fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.released {
                return;
            }
            inner.released = true;
        }

        self.disconnect();
        self.signal.close();

        if self.dispatch.send(Dispatch::Shutdown).is_err() {
            debug!(session = self.id, "delivery thread already stopped");
        }
        let delivery = lock(&self.delivery).take();
        if let Some(delivery) = delivery {
            // a handler closing its own session must not join itself
            if delivery.thread().id() != thread::current().id() && delivery.join().is_err() {
                warn!(session = self.id, "delivery thread panicked");
            }
        }
        debug!(session = self.id, "session closed");
    }
}

/// A single broker connection and the topic channel on top of it.
///
/// Sessions are created by a [`Context`]. They are single use: connect
/// once, then disconnect or close. Dropping a session closes it.
pub struct Session {
    id: u64,
    endpoint: Endpoint,
    options: ConnectOptions,
    subconfirm_timeout: Duration,
    context: Context,
    pub(crate) shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(
        context: Context,
        id: u64,
        endpoint: Endpoint,
        options: ConnectOptions,
        subconfirm_timeout: Duration,
        on_message: Option<MessageHandler>,
        on_event: Option<EventHandler>,
    ) -> Result<Self> {
        let (dispatch, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            id,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                released: false,
                connection: None,
                subscriptions: Vec::new(),
                pending: HashMap::new(),
            }),
            has_message_handler: AtomicBool::new(on_message.is_some()),
            on_message: Mutex::new(on_message),
            on_event: Mutex::new(on_event),
            signal: MessageSignal::default(),
            dispatch,
            delivery: Mutex::new(None),
        });

        let delivery_shared = shared.clone();
        let delivery = thread::Builder::new()
            .name(format!("session-delivery-{}", id))
            .spawn(move || delivery::run(delivery_shared, receiver))
            .map_err(|e| SessionError::InitializationFailure(e.to_string()))?;
        *lock(&shared.delivery) = Some(delivery);

        debug!(session = id, %endpoint, client = %options.client_name, "session created");
        Ok(Self {
            id,
            endpoint,
            options,
            subconfirm_timeout,
            context,
            shared,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client_name(&self) -> &str {
        &self.options.client_name
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Opens the broker connection. Blocks until the transport has accepted
    /// or refused the client.
    ///
    /// Only valid once, from [`SessionState::Uninitialized`].
    pub fn connect(&self) -> Result<()> {
        {
            let mut inner = lock(&self.shared.inner);
            inner.ensure_usable()?;
            if inner.state != SessionState::Uninitialized {
                return Err(SessionError::InvalidState(inner.state));
            }
            self.shared.transition(&mut inner, SessionState::Connecting);
        }

        let result = self
            .context
            .connector()
            .open(&self.endpoint, &self.options, self.shared.sink());

        let mut inner = lock(&self.shared.inner);
        match result {
            Ok(connection) => {
                let connection: Arc<dyn Connection> = Arc::from(connection);
                if inner.state != SessionState::Connecting {
                    // disconnected or closed while the transport was connecting
                    drop(inner);
                    connection.close();
                    return Err(SessionError::SessionClosed);
                }
                inner.connection = Some(connection);
                self.shared.transition(&mut inner, SessionState::Connected);
                info!(session = self.id, endpoint = %self.endpoint, "session connected");
                Ok(())
            }
            Err(e) => {
                warn!(
                    session = self.id,
                    endpoint = %self.endpoint,
                    error = %e,
                    "session failed to connect"
                );
                if inner.state == SessionState::Connecting {
                    self.shared.transition(&mut inner, SessionState::Failed);
                }
                Err(SessionError::Connect(e))
            }
        }
    }

    /// Best effort teardown of the connection. Never fails and does nothing
    /// once the session is already closed or failed.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Disconnects and stops the delivery thread. Blocked waiters return
    /// [`SessionError::SessionClosed`]; every later call other than
    /// `disconnect`, `close` and `state` fails with
    /// [`SessionError::UseAfterClose`].
    pub fn close(&self) {
        self.shared.close();
        self.context.unregister(self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
