use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::message::InboundMessage;
use crate::session::{SessionBuilder, SessionEvent, Shared};
use crate::transport::Connector;
use crate::util::lock;
use crate::{ContextError, Endpoint, Session, SessionError};

struct ContextInner {
    connector: Box<dyn Connector>,
    next_session_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Weak<Shared>>>,
    shutdown: AtomicBool,
}

/// Process scoped state every session is created from.
///
/// Holds the transport connector and hands out session ids. Cloning is
/// cheap and all clones refer to the same context. Sessions keep their
/// context alive, so dropping the last `Context` handle while sessions are
/// open is fine.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new<C>(connector: C) -> Self
    where
        C: Connector + 'static,
    {
        Self {
            inner: Arc::new(ContextInner {
                connector: Box::new(connector),
                next_session_id: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_builder(&self) -> SessionBuilder {
        SessionBuilder::new(self.clone())
    }

    /// Creates an unconnected session for `endpoint` with default options.
    pub fn create_session(&self, endpoint: Endpoint) -> Result<Session, SessionError> {
        self.session_builder().endpoint(endpoint).build()
    }

    /// Creates a session and connects it.
    pub fn session<M, E>(
        &self,
        endpoint: Endpoint,
        on_message: Option<M>,
        on_event: Option<E>,
    ) -> Result<Session, SessionError>
    where
        M: FnMut(InboundMessage) + Send + 'static,
        E: FnMut(SessionEvent) + Send + 'static,
    {
        let mut builder = self.session_builder().endpoint(endpoint);
        if let Some(on_message) = on_message {
            builder = builder.on_message(on_message);
        }
        if let Some(on_event) = on_event {
            builder = builder.on_event(on_event);
        }

        let session = builder.build()?;
        session.connect()?;
        Ok(session)
    }

    /// Closes every live session. Creating sessions afterwards fails with
    /// [`ContextError::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<_> = lock(&self.inner.sessions).drain().collect();
        info!(sessions = sessions.len(), "context shutting down");
        for (id, session) in sessions {
            if let Some(shared) = session.upgrade() {
                debug!(session = id, "closing session on shutdown");
                shared.close();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Number of sessions created from this context that are not closed yet.
    pub fn live_sessions(&self) -> usize {
        lock(&self.inner.sessions)
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.inner.connector.as_ref()
    }

    pub(crate) fn next_session_id(&self) -> Result<u64, ContextError> {
        if self.is_shutdown() {
            return Err(ContextError::Shutdown);
        }
        Ok(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, session: &Session) {
        lock(&self.inner.sessions).insert(session.id(), Arc::downgrade(&session.shared));
    }

    pub(crate) fn unregister(&self, session_id: u64) {
        lock(&self.inner.sessions).remove(&session_id);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("live_sessions", &self.live_sessions())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackBroker;

    fn endpoint() -> Endpoint {
        Endpoint::new("loopback", "default", "default", "").unwrap()
    }

    #[test]
    fn session_ids_are_unique() {
        let context = Context::new(LoopbackBroker::new());
        let a = context.create_session(endpoint()).unwrap();
        let b = context.create_session(endpoint()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.client_name(), b.client_name());
        assert_eq!(context.live_sessions(), 2);

        drop(a);
        assert_eq!(context.live_sessions(), 1);
    }

    #[test]
    fn shutdown_closes_sessions() {
        let context = Context::new(LoopbackBroker::new());
        let session = context
            .session(
                endpoint(),
                None::<fn(InboundMessage)>,
                None::<fn(SessionEvent)>,
            )
            .unwrap();

        context.shutdown();
        assert!(matches!(
            session.publish_to("a/b", "x"),
            Err(SessionError::UseAfterClose)
        ));
        assert!(matches!(
            context.create_session(endpoint()),
            Err(SessionError::Context(ContextError::Shutdown))
        ));
    }
}
