//! Device-to-cloud and cloud-to-device message types.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Maximum length of the message and correlation identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Maximum length of the content type and content encoding fields.
pub const MAX_CONTENT_FIELD_LEN: usize = 64;

/// An application message sent to, or received from, the cloud.
///
/// The payload is immutable once the message has been built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Vec<u8>,
    message_id: Option<heapless::String<MAX_ID_LEN>>,
    correlation_id: Option<heapless::String<MAX_ID_LEN>>,
    content_type: Option<heapless::String<MAX_CONTENT_FIELD_LEN>>,
    content_encoding: Option<heapless::String<MAX_CONTENT_FIELD_LEN>>,
    properties: Vec<(String, String)>,
}

impl Message {
    /// Creates a message around `payload`.
    ///
    /// Fails with [`Error::InvalidArgument`] for an empty payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            payload,
            message_id: None,
            correlation_id: None,
            content_type: None,
            content_encoding: None,
            properties: Vec::new(),
        })
    }

    /// Sets the message identifier.
    pub fn with_message_id(mut self, id: &str) -> Result<Self> {
        self.message_id = Some(bounded(id)?);
        Ok(self)
    }

    /// Sets the correlation identifier.
    pub fn with_correlation_id(mut self, id: &str) -> Result<Self> {
        self.correlation_id = Some(bounded(id)?);
        Ok(self)
    }

    /// Sets the content type, e.g. `application/json`.
    pub fn with_content_type(mut self, content_type: &str) -> Result<Self> {
        self.content_type = Some(bounded(content_type)?);
        Ok(self)
    }

    /// Sets the content encoding, e.g. `utf-8`.
    pub fn with_content_encoding(mut self, encoding: &str) -> Result<Self> {
        self.content_encoding = Some(bounded(encoding)?);
        Ok(self)
    }

    /// Adds an application property. Keys must be non-empty and unique.
    pub fn with_property(mut self, key: &str, value: &str) -> Result<Self> {
        if key.is_empty() || self.property(key).is_some() {
            return Err(Error::InvalidArgument);
        }
        self.properties.push((String::from(key), String::from(value)));
        Ok(self)
    }

    /// The message body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The message identifier, if set.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// The correlation identifier, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The content encoding, if set.
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// Looks up an application property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All application properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn bounded<const N: usize>(value: &str) -> Result<heapless::String<N>> {
    if value.is_empty() {
        return Err(Error::InvalidArgument);
    }
    heapless::String::try_from(value).map_err(|_| Error::InvalidArgument)
}

/// Transport-issued handle used to settle a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeliveryToken(pub u64);

/// How the application settled a cloud-to-device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// The message was processed and can be removed.
    Accepted,
    /// The message cannot be processed and should be dead-lettered.
    Rejected,
    /// The message should be redelivered later.
    Abandoned,
}

/// A cloud-to-device message surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Token to pass back with the disposition.
    pub token: DeliveryToken,
    /// The message itself.
    pub message: Message,
}

/// Handler for cloud-to-device messages. The returned disposition is sent
/// back to the transport.
pub type MessageCallback = alloc::boxed::Box<dyn FnMut(&Message) -> Disposition>;
