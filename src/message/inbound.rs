use std::fmt;

use super::{Message, MessageDestination};

/// A message received from the broker.
///
/// This is a borrowed view that is only valid for the duration of the
/// `on_message` call it is handed to. Copy the payload out if it needs to
/// outlive the handler.
pub struct InboundMessage<'a> {
    destination: &'a MessageDestination,
    payload: &'a [u8],
}

impl<'a> InboundMessage<'a> {
    pub(crate) fn new(destination: &'a MessageDestination, payload: &'a [u8]) -> Self {
        Self {
            destination,
            payload,
        }
    }
}

impl Message for InboundMessage<'_> {
    fn get_destination(&self) -> &MessageDestination {
        self.destination
    }

    fn get_payload(&self) -> &[u8] {
        self.payload
    }
}

impl fmt::Debug for InboundMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("destination", &self.destination.as_str())
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
