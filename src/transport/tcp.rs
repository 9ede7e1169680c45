//! Client side of the TCP transport.

mod server;

pub use server::{TcpBroker, TcpBrokerHandle};

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use super::frame::Frame;
use super::{ConnectOptions, Connection, Connector, InboundSink, TransportError};
use crate::util::lock;
use crate::Endpoint;

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    fn dial(endpoint: &Endpoint, options: &ConnectOptions) -> Result<TcpStream, TransportError> {
        let mut last_err = None;
        for addr in endpoint.address().to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, options.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    last_err = Some(TransportError::Timeout(options.connect_timeout));
                }
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            TransportError::Protocol(format!(
                "{} did not resolve to any address",
                endpoint.address()
            ))
        }))
    }
}

fn is_timeout(err: &TransportError) -> bool {
    matches!(err, TransportError::Io(e)
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut)
}

impl Connector for TcpConnector {
    fn open(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        sink: InboundSink,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut stream = Self::dial(endpoint, options)?;
        stream.set_nodelay(options.tcp_nodelay)?;

        // the handshake shares the connect timeout
        stream.set_read_timeout(Some(options.connect_timeout))?;
        Frame::Connect {
            vpn_name: endpoint.vpn_name().to_owned(),
            username: endpoint.username().to_owned(),
            password: endpoint.password().to_owned(),
            client_name: options.client_name.clone(),
            application_description: options
                .application_description
                .clone()
                .unwrap_or_default(),
        }
        .write_to(&mut stream)?;

        let reply = Frame::read_from(&mut stream).map_err(|e| {
            if is_timeout(&e) {
                TransportError::Timeout(options.connect_timeout)
            } else {
                e
            }
        })?;
        match reply {
            Some(Frame::ConnectReply { code, .. }) if code.is_ok() => {}
            Some(Frame::ConnectReply { code, reason }) => {
                return Err(TransportError::Rejected { code, reason });
            }
            Some(other) => {
                return Err(TransportError::Protocol(format!(
                    "expected connect reply, got {:?}",
                    other.kind()
                )));
            }
            None => return Err(TransportError::Closed),
        }
        stream.set_read_timeout(None)?;
        debug!(%endpoint, client = %options.client_name, "tcp connection established");

        let closed = Arc::new(AtomicBool::new(false));
        let reader = stream.try_clone()?;
        let reader_closed = closed.clone();
        let reader = thread::Builder::new()
            .name(format!("tcp-reader-{}", options.client_name))
            .spawn(move || read_loop(reader, sink, reader_closed))?;

        Ok(Box::new(TcpConnection {
            writer: Mutex::new(stream),
            closed,
            reader: Mutex::new(Some(reader)),
        }))
    }
}

fn read_loop(mut stream: TcpStream, sink: InboundSink, closed: Arc<AtomicBool>) {
    loop {
        let frame = match Frame::read_from(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if !closed.load(Ordering::Acquire) {
                    sink.down("broker closed the connection");
                }
                return;
            }
            Err(e) => {
                if !closed.load(Ordering::Acquire) {
                    sink.down(format!("connection lost: {}", e));
                }
                return;
            }
        };

        trace!(kind = ?frame.kind(), "frame received");
        let alive = match frame {
            Frame::Message { topic, payload } => sink.deliver(topic, payload),
            Frame::SubscriptionReply {
                pattern,
                code,
                reason,
            } => {
                if code.is_ok() {
                    sink.subscription_ok(pattern)
                } else {
                    sink.subscription_error(pattern, code, reason)
                }
            }
            Frame::Disconnect { reason } => {
                closed.store(true, Ordering::Release);
                sink.down(reason);
                return;
            }
            other => {
                warn!(kind = ?other.kind(), "unexpected frame from broker, ignoring");
                true
            }
        };

        if !alive {
            // the session is gone, nobody is left to read
            return;
        }
    }
}

pub struct TcpConnection {
    writer: Mutex<TcpStream>,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpConnection {
    fn write(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut writer = lock(&self.writer);
        frame.write_to(&mut *writer)
    }
}

impl Connection for TcpConnection {
    fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.write(Frame::Publish {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        })
    }

    fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.write(Frame::Subscribe {
            pattern: pattern.to_owned(),
        })
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.write(Frame::Unsubscribe {
            pattern: pattern.to_owned(),
        })
    }

    fn close(&self) {
        let already_closed = self.closed.swap(true, Ordering::AcqRel);
        {
            let mut writer = lock(&self.writer);
            if !already_closed {
                let _ = Frame::Disconnect {
                    reason: "client disconnect".to_owned(),
                }
                .write_to(&mut *writer);
            }
            let _ = writer.shutdown(Shutdown::Both);
        }

        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            if reader.thread().id() != thread::current().id() && reader.join().is_err() {
                warn!("tcp reader thread panicked");
            }
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
