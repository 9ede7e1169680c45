use super::{Message, MessageDestination};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageBuilderError {
    #[error("{0} arg need to be set")]
    MissingRequiredArgs(String),
}

type Result<T> = std::result::Result<T, MessageBuilderError>;

/// A message ready to be published. Immutable once built.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    destination: MessageDestination,
    payload: Vec<u8>,
}

impl Message for OutboundMessage {
    fn get_destination(&self) -> &MessageDestination {
        &self.destination
    }

    fn get_payload(&self) -> &[u8] {
        &self.payload
    }
}

#[derive(Default)]
pub struct OutboundMessageBuilder {
    destination: Option<MessageDestination>,
    payload: Option<Vec<u8>>,
}

impl OutboundMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destination(mut self, destination: MessageDestination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn payload<M>(mut self, payload: M) -> Self
    where
        M: Into<Vec<u8>>,
    {
        self.payload = Some(payload.into());
        self
    }

    /// A missing payload is sent as an empty binary attachment.
    pub fn build(self) -> Result<OutboundMessage> {
        let Some(destination) = self.destination else {
            return Err(MessageBuilderError::MissingRequiredArgs(
                "destination".to_owned(),
            ));
        };

        Ok(OutboundMessage {
            destination,
            payload: self.payload.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_requires_destination() {
        let err = OutboundMessageBuilder::new().payload("hi").build().unwrap_err();
        assert!(matches!(
            err,
            MessageBuilderError::MissingRequiredArgs(ref arg) if arg == "destination"
        ));
    }

    #[test]
    fn it_keeps_payload_bytes() {
        let msg = OutboundMessageBuilder::new()
            .destination(MessageDestination::new("try-me").unwrap())
            .payload(vec![0u8, 1, 2, 255])
            .build()
            .unwrap();
        assert_eq!(msg.get_payload(), &[0u8, 1, 2, 255]);
        assert_eq!(msg.get_destination().as_str(), "try-me");
    }

    #[test]
    fn missing_payload_is_empty() {
        let msg = OutboundMessageBuilder::new()
            .destination(MessageDestination::new("try-me").unwrap())
            .build()
            .unwrap();
        assert!(msg.get_payload().is_empty());
    }
}
