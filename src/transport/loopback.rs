//! An in-process broker.
//!
//! Clients are isolated per message VPN. Credentials are only checked once
//! at least one user has been registered; an empty user table accepts
//! everybody, which is what a development broker usually does.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use super::{ConnectOptions, Connection, Connector, InboundSink, TransportError};
use crate::topic::{validate_topic, TopicPattern};
use crate::util::lock;
use crate::{Endpoint, ReturnCode};

struct Client {
    vpn_name: String,
    client_name: String,
    sink: InboundSink,
    subscriptions: Vec<TopicPattern>,
}

impl Client {
    fn is_interested(&self, vpn_name: &str, topic: &str) -> bool {
        self.vpn_name == vpn_name && self.subscriptions.iter().any(|s| s.matches(topic))
    }
}

#[derive(Default)]
struct BrokerState {
    // (vpn, username) -> password
    users: HashMap<(String, String), String>,
    vpns: HashSet<String>,
    clients: HashMap<u64, Client>,
    next_client_id: u64,
    reject_sends: bool,
    withhold_confirmations: bool,
}

impl BrokerState {
    fn authenticate(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.users.is_empty() {
            return Ok(());
        }
        if !self.vpns.contains(endpoint.vpn_name()) {
            return Err(TransportError::rejected(
                ReturnCode::UnknownVpn,
                format!("message vpn {} does not exist", endpoint.vpn_name()),
            ));
        }
        let key = (
            endpoint.vpn_name().to_owned(),
            endpoint.username().to_owned(),
        );
        match self.users.get(&key) {
            Some(password) if password == endpoint.password() => Ok(()),
            _ => Err(TransportError::rejected(
                ReturnCode::NotAuthorized,
                "client username or password is invalid",
            )),
        }
    }
}

/// Cheap to clone; clones share the same broker.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user<U, V, P>(self, username: U, vpn_name: V, password: P) -> Self
    where
        U: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        self.add_user(username, vpn_name, password);
        self
    }

    pub fn add_user<U, V, P>(&self, username: U, vpn_name: V, password: P)
    where
        U: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        let vpn_name = vpn_name.into();
        let mut state = lock(&self.state);
        state.vpns.insert(vpn_name.clone());
        state
            .users
            .insert((vpn_name, username.into()), password.into());
    }

    pub fn client_count(&self) -> usize {
        lock(&self.state).clients.len()
    }

    /// Client names of everyone connected, sorted.
    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.state)
            .clients
            .values()
            .map(|c| c.client_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Makes every subsequent publish fail.
    pub fn set_reject_sends(&self, reject: bool) {
        lock(&self.state).reject_sends = reject;
    }

    /// Subscriptions are still applied but never confirmed.
    pub fn set_withhold_confirmations(&self, withhold: bool) {
        lock(&self.state).withhold_confirmations = withhold;
    }

    /// Drops every client, telling each one why.
    pub fn disconnect_all<R: Into<String>>(&self, reason: R) {
        let reason = reason.into();
        let clients: Vec<_> = lock(&self.state).clients.drain().collect();
        for (id, client) in clients {
            debug!(client = id, "disconnecting client");
            client.sink.down(reason.clone());
        }
    }

    fn route(&self, vpn_name: &str, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let sinks: Vec<(u64, InboundSink)> = {
            let state = lock(&self.state);
            if state.reject_sends {
                return Err(TransportError::rejected(
                    ReturnCode::Fail,
                    "broker is rejecting messages",
                ));
            }
            state
                .clients
                .iter()
                .filter(|(_, c)| c.is_interested(vpn_name, topic))
                .map(|(id, c)| (*id, c.sink.clone()))
                .collect()
        };

        trace!(topic, receivers = sinks.len(), "routing message");
        // deliver outside the lock, a sink may block on a socket write
        let mut gone = vec![];
        for (id, sink) in sinks {
            if !sink.deliver(topic.to_owned(), payload.to_vec()) {
                gone.push(id);
            }
        }

        if !gone.is_empty() {
            let mut state = lock(&self.state);
            for id in gone {
                warn!(client = id, "client stopped reading, dropping it");
                state.clients.remove(&id);
            }
        }
        Ok(())
    }
}

impl Connector for LoopbackBroker {
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        sink: InboundSink,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = lock(&self.state);
        state.authenticate(endpoint)?;

        state.next_client_id += 1;
        let id = state.next_client_id;
        state.clients.insert(
            id,
            Client {
                vpn_name: endpoint.vpn_name().to_owned(),
                client_name: options.client_name.clone(),
                sink,
                subscriptions: vec![],
            },
        );
        debug!(client = id, name = %options.client_name, %endpoint, "client connected");

        Ok(Box::new(LoopbackConnection {
            broker: self.clone(),
            id,
            vpn_name: endpoint.vpn_name().to_owned(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct LoopbackConnection {
    broker: LoopbackBroker,
    id: u64,
    vpn_name: String,
    closed: AtomicBool,
}

impl LoopbackConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Connection for LoopbackConnection {
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic(topic)
            .map_err(|e| TransportError::rejected(ReturnCode::InvalidTopic, e.to_string()))?;
        self.broker.route(&self.vpn_name, topic, payload)
    }

    fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut state = lock(&self.broker.state);
        let withhold = state.withhold_confirmations;
        let Some(client) = state.clients.get_mut(&self.id) else {
            return Err(TransportError::Closed);
        };
        let sink = client.sink.clone();

        match TopicPattern::parse(pattern) {
            Ok(parsed) => {
                if !client.subscriptions.contains(&parsed) {
                    client.subscriptions.push(parsed);
                }
                drop(state);
                if !withhold {
                    sink.subscription_ok(pattern.to_owned());
                }
            }
            Err(e) => {
                drop(state);
                debug!(client = self.id, pattern, error = %e, "rejecting subscription");
                sink.subscription_error(
                    pattern.to_owned(),
                    ReturnCode::InvalidTopic,
                    e.to_string(),
                );
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut state = lock(&self.broker.state);
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.subscriptions.retain(|s| s.as_str() != pattern);
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.broker.state).clients.remove(&self.id);
        debug!(client = self.id, "client disconnected");
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::channel_sink;
    use crate::transport::TransportEvent;
    use std::sync::mpsc::Receiver;

    fn endpoint(user: &str, vpn: &str, password: &str) -> Endpoint {
        Endpoint::new("loopback", user, vpn, password).unwrap()
    }

    fn open(broker: &LoopbackBroker, vpn: &str) -> (Box<dyn Connection>, Receiver<TransportEvent>) {
        let (sink, rx) = channel_sink();
        let options = ConnectOptions::default();
        let conn = broker
            .open(&endpoint("default", vpn, ""), &options, sink)
            .unwrap();
        (conn, rx)
    }

    #[test]
    fn open_broker_accepts_anyone() {
        let broker = LoopbackBroker::new();
        let (sink, _rx) = channel_sink();
        let options = ConnectOptions::default();
        let conn = broker
            .open(&endpoint("foo", "default", "bar"), &options, sink)
            .unwrap();
        assert_eq!(broker.client_count(), 1);

        drop(conn);
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn it_checks_credentials() {
        let broker = LoopbackBroker::new().with_user("foo", "default", "bar");

        let options = ConnectOptions::default();
        let (sink, _rx) = channel_sink();
        let err = broker
            .open(&endpoint("foo", "default", "nope"), &options, sink.clone())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TransportError::Rejected {
                code: ReturnCode::NotAuthorized,
                ..
            }
        ));

        let err = broker
            .open(&endpoint("foo", "other", "bar"), &options, sink.clone())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TransportError::Rejected {
                code: ReturnCode::UnknownVpn,
                ..
            }
        ));

        let _conn = broker
            .open(&endpoint("foo", "default", "bar"), &options, sink)
            .unwrap();
    }

    #[test]
    fn it_routes_to_matching_subscribers_in_the_same_vpn() {
        let broker = LoopbackBroker::new();
        let (publisher, _) = open(&broker, "default");
        let (sub, sub_rx) = open(&broker, "default");
        let (other_vpn, other_rx) = open(&broker, "other");

        sub.subscribe("tutorial/>").unwrap();
        other_vpn.subscribe("tutorial/>").unwrap();
        assert_eq!(
            sub_rx.recv().unwrap(),
            TransportEvent::SubscriptionOk {
                pattern: "tutorial/>".to_owned()
            }
        );
        let _ = other_rx.recv().unwrap();

        publisher.send("tutorial/topic", b"Hello world!").unwrap();

        assert_eq!(
            sub_rx.recv().unwrap(),
            TransportEvent::Message {
                topic: "tutorial/topic".to_owned(),
                payload: b"Hello world!".to_vec()
            }
        );
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn overlapping_subscriptions_deliver_once() {
        let broker = LoopbackBroker::new();
        let (conn, rx) = open(&broker, "default");
        conn.subscribe("a/*").unwrap();
        conn.subscribe("a/>").unwrap();
        let _ = rx.recv().unwrap();
        let _ = rx.recv().unwrap();

        conn.send("a/b", b"").unwrap();
        assert!(matches!(rx.recv().unwrap(), TransportEvent::Message { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalid_pattern_is_reported_through_the_sink() {
        let broker = LoopbackBroker::new();
        let (conn, rx) = open(&broker, "default");
        conn.subscribe("a//b").unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            TransportEvent::SubscriptionError {
                code: ReturnCode::InvalidTopic,
                ..
            }
        ));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = LoopbackBroker::new();
        let (conn, rx) = open(&broker, "default");
        conn.subscribe("a").unwrap();
        let _ = rx.recv().unwrap();
        conn.unsubscribe("a").unwrap();
        conn.send("a", b"x").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_connection_refuses_work() {
        let broker = LoopbackBroker::new();
        let (conn, _rx) = open(&broker, "default");
        conn.close();
        conn.close();
        assert_eq!(broker.client_count(), 0);
        assert!(matches!(conn.send("a", b"x"), Err(TransportError::Closed)));
        assert!(matches!(conn.subscribe("a"), Err(TransportError::Closed)));
    }

    #[test]
    fn disconnect_all_notifies_clients() {
        let broker = LoopbackBroker::new();
        let (_conn, rx) = open(&broker, "default");
        broker.disconnect_all("maintenance");
        assert_eq!(
            rx.recv().unwrap(),
            TransportEvent::Down {
                reason: "maintenance".to_owned()
            }
        );
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn dead_sinks_are_dropped() {
        let broker = LoopbackBroker::new();
        let (publisher, _) = open(&broker, "default");
        let (sub, rx) = open(&broker, "default");
        sub.subscribe("a").unwrap();
        drop(rx);

        publisher.send("a", b"x").unwrap();
        assert_eq!(broker.client_count(), 1);
    }
}
