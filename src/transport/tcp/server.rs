use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::transport::frame::Frame;
use crate::transport::loopback::LoopbackBroker;
use crate::transport::{
    ConnectOptions, Connection, Connector, InboundSink, TransportError, TransportEvent,
};
use crate::util::lock;
use crate::{Endpoint, ReturnCode};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves a [`LoopbackBroker`] to TCP clients.
pub struct TcpBroker {
    listener: TcpListener,
    broker: LoopbackBroker,
    stopped: Arc<AtomicBool>,
}

impl TcpBroker {
    pub fn bind<A: ToSocketAddrs>(addr: A, broker: LoopbackBroker) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            broker,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until stopped, one thread per client.
    pub fn serve(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "broker listening");

        for stream in self.listener.incoming() {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let broker = self.broker.clone();
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_owned());
            let spawned = thread::Builder::new()
                .name(format!("broker-client-{}", peer))
                .spawn(move || {
                    if let Err(e) = handle_client(stream, &broker, &peer) {
                        debug!(%peer, error = %e, "client connection ended with error");
                    }
                });
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn client thread");
            }
        }
        Ok(())
    }

    /// Runs [`TcpBroker::serve`] on a background thread.
    pub fn spawn(self) -> io::Result<TcpBrokerHandle> {
        let addr = self.local_addr()?;
        let stopped = self.stopped.clone();
        let thread = thread::Builder::new()
            .name("broker-accept".to_owned())
            .spawn(move || {
                if let Err(e) = self.serve() {
                    warn!(error = %e, "broker stopped with error");
                }
            })?;
        Ok(TcpBrokerHandle {
            addr,
            stopped,
            thread: Some(thread),
        })
    }
}

pub struct TcpBrokerHandle {
    addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TcpBrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting new clients. Connected clients keep running until
    /// they disconnect.
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TcpBrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_to_frame(event: TransportEvent) -> Frame {
    match event {
        TransportEvent::Message { topic, payload } => Frame::Message { topic, payload },
        TransportEvent::SubscriptionOk { pattern } => Frame::SubscriptionReply {
            pattern,
            code: ReturnCode::Ok,
            reason: String::new(),
        },
        TransportEvent::SubscriptionError {
            pattern,
            code,
            reason,
        } => Frame::SubscriptionReply {
            pattern,
            code,
            reason,
        },
        TransportEvent::Down { reason } => Frame::Disconnect { reason },
    }
}

fn handle_client(
    mut stream: TcpStream,
    broker: &LoopbackBroker,
    peer: &str,
) -> Result<(), TransportError> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let Some(Frame::Connect {
        vpn_name,
        username,
        password,
        client_name,
        application_description,
    }) = Frame::read_from(&mut stream)?
    else {
        return Err(TransportError::Protocol(
            "expected connect as the first frame".to_owned(),
        ));
    };
    stream.set_read_timeout(None)?;

    let writer = Arc::new(Mutex::new(stream.try_clone()?));
    let reply = |code: ReturnCode, reason: String| -> Result<(), TransportError> {
        Frame::ConnectReply { code, reason }.write_to(&mut *lock(&writer))
    };

    let endpoint = match Endpoint::new(peer, username, vpn_name, password) {
        Ok(endpoint) => endpoint,
        Err(e) => return reply(ReturnCode::Fail, e.to_string()),
    };
    let options = ConnectOptions {
        client_name,
        application_description: Some(application_description).filter(|d| !d.is_empty()),
        ..ConnectOptions::default()
    };

    let sink_writer = writer.clone();
    let sink = InboundSink::new(move |event| {
        event_to_frame(event)
            .write_to(&mut *lock(&sink_writer))
            .is_ok()
    });

    let connection = match broker.open(&endpoint, &options, sink) {
        Ok(connection) => connection,
        Err(TransportError::Rejected { code, reason }) => return reply(code, reason),
        Err(e) => return reply(ReturnCode::Fail, e.to_string()),
    };
    reply(ReturnCode::Ok, String::new())?;

    let result = serve_client(&mut stream, connection.as_ref(), peer);
    connection.close();
    let _ = stream.shutdown(Shutdown::Both);
    result
}

fn serve_client(
    stream: &mut TcpStream,
    connection: &dyn Connection,
    peer: &str,
) -> Result<(), TransportError> {
    while let Some(frame) = Frame::read_from(stream)? {
        match frame {
            Frame::Publish { topic, payload } => {
                // fire and forget, there is no reply to carry the error
                if let Err(e) = connection.send(&topic, &payload) {
                    warn!(%peer, %topic, error = %e, "dropping published message");
                }
            }
            Frame::Subscribe { pattern } => connection.subscribe(&pattern)?,
            Frame::Unsubscribe { pattern } => connection.unsubscribe(&pattern)?,
            Frame::Disconnect { .. } => {
                debug!(%peer, "client disconnected");
                return Ok(());
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected {:?} frame from client",
                    other.kind()
                )));
            }
        }
    }
    Ok(())
}
