pub mod destination;
pub mod inbound;
pub mod outbound;

pub use destination::MessageDestination;
pub use inbound::InboundMessage;
pub use outbound::{MessageBuilderError, OutboundMessage, OutboundMessageBuilder};

use std::fmt::Write;
use std::str::Utf8Error;

const DUMP_BYTES_PER_LINE: usize = 16;

pub trait Message {
    fn get_destination(&self) -> &MessageDestination;

    fn get_payload(&self) -> &[u8];

    fn get_payload_as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.get_payload())
    }

    fn get_binary_attachment_size(&self) -> usize {
        self.get_payload().len()
    }

    /// Human readable rendering of the message: destination, payload size
    /// and a hex dump of the payload.
    fn dump(&self) -> String {
        let payload = self.get_payload();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "{:<40}Topic '{}'",
            "Destination:",
            self.get_destination()
        );
        let _ = writeln!(out, "{:<40}len={}", "Binary Attachment:", payload.len());

        for chunk in payload.chunks(DUMP_BYTES_PER_LINE) {
            let mut hex = String::with_capacity(DUMP_BYTES_PER_LINE * 3 + 1);
            for (i, b) in chunk.iter().enumerate() {
                if i == DUMP_BYTES_PER_LINE / 2 {
                    hex.push(' ');
                }
                let _ = write!(hex, "{:02x} ", b);
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            let _ = writeln!(out, "  {:<50}{}", hex, ascii);
        }

        out
    }
}
