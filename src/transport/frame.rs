//! Wire frames of the TCP transport.
//!
//! `[kind: u8][len: u32 BE][body]`. Inside the body strings are `u16 BE`
//! length prefixed UTF-8 and payloads `u32 BE` length prefixed bytes.

use std::io::{self, Read, Write};

use enum_primitive::*;
use num_traits::FromPrimitive;

use super::TransportError;
use crate::ReturnCode;

pub(crate) const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 5;

enum_from_primitive! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    #[repr(u8)]
    pub enum FrameKind {
        Connect = 1,
        ConnectReply = 2,
        Publish = 3,
        Subscribe = 4,
        Unsubscribe = 5,
        SubscriptionReply = 6,
        Message = 7,
        Disconnect = 8,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Connect {
        vpn_name: String,
        username: String,
        password: String,
        client_name: String,
        application_description: String,
    },
    ConnectReply {
        code: ReturnCode,
        reason: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
    },
    Subscribe {
        pattern: String,
    },
    Unsubscribe {
        pattern: String,
    },
    SubscriptionReply {
        pattern: String,
        code: ReturnCode,
        reason: String,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
    },
    Disconnect {
        reason: String,
    },
}

impl Frame {
    pub(crate) fn kind(&self) -> FrameKind {
        match self {
            Self::Connect { .. } => FrameKind::Connect,
            Self::ConnectReply { .. } => FrameKind::ConnectReply,
            Self::Publish { .. } => FrameKind::Publish,
            Self::Subscribe { .. } => FrameKind::Subscribe,
            Self::Unsubscribe { .. } => FrameKind::Unsubscribe,
            Self::SubscriptionReply { .. } => FrameKind::SubscriptionReply,
            Self::Message { .. } => FrameKind::Message,
            Self::Disconnect { .. } => FrameKind::Disconnect,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut body = BodyWriter::default();
        match self {
            Self::Connect {
                vpn_name,
                username,
                password,
                client_name,
                application_description,
            } => {
                body.put_str(vpn_name)?;
                body.put_str(username)?;
                body.put_str(password)?;
                body.put_str(client_name)?;
                body.put_str(application_description)?;
            }
            Self::ConnectReply { code, reason } => {
                body.put_u8(*code as u8);
                body.put_str(reason)?;
            }
            Self::Publish { topic, payload } | Self::Message { topic, payload } => {
                body.put_str(topic)?;
                body.put_bytes(payload)?;
            }
            Self::Subscribe { pattern } | Self::Unsubscribe { pattern } => {
                body.put_str(pattern)?;
            }
            Self::SubscriptionReply {
                pattern,
                code,
                reason,
            } => {
                body.put_str(pattern)?;
                body.put_u8(*code as u8);
                body.put_str(reason)?;
            }
            Self::Disconnect { reason } => {
                body.put_str(reason)?;
            }
        }

        let body = body.0;
        if body.len() > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "frame of {} bytes exceeds the {} byte limit",
                body.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(self.kind() as u8);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TransportError> {
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads one frame. `Ok(None)` means the peer closed the stream cleanly
    /// between frames.
    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        reader.read_exact(&mut header[1..])?;

        let kind = FrameKind::from_u8(header[0]).ok_or_else(|| {
            TransportError::Protocol(format!("unknown frame kind {}", header[0]))
        })?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "frame of {} bytes exceeds the {} byte limit",
                len, MAX_FRAME_LEN
            )));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        Self::decode(kind, &body).map(Some)
    }

    fn decode(kind: FrameKind, body: &[u8]) -> Result<Self, TransportError> {
        let mut r = BodyReader { buf: body };
        let frame = match kind {
            FrameKind::Connect => Self::Connect {
                vpn_name: r.get_str()?,
                username: r.get_str()?,
                password: r.get_str()?,
                client_name: r.get_str()?,
                application_description: r.get_str()?,
            },
            FrameKind::ConnectReply => Self::ConnectReply {
                code: ReturnCode::from_raw(r.get_u8()?),
                reason: r.get_str()?,
            },
            FrameKind::Publish => Self::Publish {
                topic: r.get_str()?,
                payload: r.get_bytes()?,
            },
            FrameKind::Subscribe => Self::Subscribe {
                pattern: r.get_str()?,
            },
            FrameKind::Unsubscribe => Self::Unsubscribe {
                pattern: r.get_str()?,
            },
            FrameKind::SubscriptionReply => Self::SubscriptionReply {
                pattern: r.get_str()?,
                code: ReturnCode::from_raw(r.get_u8()?),
                reason: r.get_str()?,
            },
            FrameKind::Message => Self::Message {
                topic: r.get_str()?,
                payload: r.get_bytes()?,
            },
            FrameKind::Disconnect => Self::Disconnect {
                reason: r.get_str()?,
            },
        };

        if !r.buf.is_empty() {
            return Err(TransportError::Protocol(format!(
                "{} trailing bytes after {:?} frame",
                r.buf.len(),
                kind
            )));
        }
        Ok(frame)
    }
}

#[derive(Default)]
struct BodyWriter(Vec<u8>);

impl BodyWriter {
    fn put_u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn put_str(&mut self, s: &str) -> Result<(), TransportError> {
        let len = u16::try_from(s.len()).map_err(|_| {
            TransportError::Protocol(format!("string of {} bytes is too long", s.len()))
        })?;
        self.0.extend_from_slice(&len.to_be_bytes());
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn put_bytes(&mut self, b: &[u8]) -> Result<(), TransportError> {
        if b.len() > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte limit",
                b.len(),
                MAX_FRAME_LEN
            )));
        }
        self.0.extend_from_slice(&(b.len() as u32).to_be_bytes());
        self.0.extend_from_slice(b);
        Ok(())
    }
}

struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        if self.buf.len() < n {
            return Err(TransportError::Protocol("truncated frame body".to_owned()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn get_u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn get_str(&mut self) -> Result<String, TransportError> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| TransportError::Protocol("string is not valid utf-8".to_owned()))
    }

    fn get_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.take(4)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn publish_frame_layout() {
        let frame = Frame::Publish {
            topic: "a/b".to_owned(),
            payload: vec![1, 2],
        };
        assert_eq!(
            frame.encode().unwrap(),
            vec![3, 0, 0, 0, 11, 0, 3, b'a', b'/', b'b', 0, 0, 0, 2, 1, 2]
        );
    }

    #[test]
    fn frames_survive_a_stream() {
        let frames = vec![
            Frame::Connect {
                vpn_name: "default".to_owned(),
                username: "foo".to_owned(),
                password: String::new(),
                client_name: "client/1".to_owned(),
                application_description: String::new(),
            },
            Frame::SubscriptionReply {
                pattern: "a/>".to_owned(),
                code: ReturnCode::InvalidTopic,
                reason: "nope".to_owned(),
            },
            Frame::Message {
                topic: "a/b".to_owned(),
                payload: vec![],
            },
        ];

        let mut wire = vec![];
        for f in &frames {
            f.write_to(&mut wire).unwrap();
        }

        let mut cursor = Cursor::new(wire);
        for f in &frames {
            assert_eq!(Frame::read_from(&mut cursor).unwrap().as_ref(), Some(f));
        }
        assert!(Frame::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        let mut cursor = Cursor::new(vec![42, 0, 0, 0, 0]);
        assert!(matches!(
            Frame::read_from(&mut cursor),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_length_is_refused_before_allocating() {
        let mut wire = vec![FrameKind::Message as u8];
        wire.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        assert!(matches!(
            Frame::read_from(&mut Cursor::new(wire)),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_body_is_an_error() {
        // claims a 5 byte string but carries 1
        let mut cursor = Cursor::new(vec![4, 0, 0, 0, 3, 0, 5, b'a']);
        assert!(matches!(
            Frame::read_from(&mut cursor),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn eof_inside_header_is_an_io_error() {
        let mut cursor = Cursor::new(vec![3, 0]);
        assert!(matches!(
            Frame::read_from(&mut cursor),
            Err(TransportError::Io(_))
        ));
    }
}
