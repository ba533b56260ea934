//! Transport binding abstraction.
//!
//! The client core never speaks a wire protocol. It drives a [`Transport`],
//! which owns sockets, framing and TLS, and learns what happened on the wire
//! through [`TransportEvent`]s collected once per pump. Every method must
//! return promptly: blocking I/O belongs inside the transport, bounded by its
//! own short timeouts.

use alloc::vec::Vec;

use crate::config::ClientConfig;
use crate::connection::ConnectionEvent;
use crate::message::{Disposition, DeliveryToken, InboundMessage, Message};
use crate::method::{MethodId, MethodInvocation};
use crate::options::TransportOption;
use crate::queue::OperationId;
use crate::time::Instant;
use crate::twin::TwinUpdate;
use crate::upload::UploadTransport;

/// Common error types for transport operations
pub mod error;

use error::TransportError;

/// Cloud-to-device features a transport can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feature {
    /// Desired-property notifications.
    DeviceTwin,
    /// Direct method invocations.
    DeviceMethods,
    /// Cloud-to-device messages.
    CloudToDeviceMessages,
}

/// Service acknowledgement of a telemetry or reported-state submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    /// Accepted with the given status code.
    Success(u16),
    /// Failed in a way that may succeed on retry.
    Transient,
    /// Refused with the given status code.
    Rejected(u16),
}

/// Something the transport observed since the previous poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection came up or went down.
    Connection(ConnectionEvent),
    /// Acknowledgement of a telemetry message.
    TelemetryAck {
        /// Operation the acknowledgement belongs to.
        id: OperationId,
        /// Service verdict.
        ack: Ack,
    },
    /// Acknowledgement of a reported-state update.
    ReportedStateAck {
        /// Operation the acknowledgement belongs to.
        id: OperationId,
        /// Service verdict.
        ack: Ack,
    },
    /// Desired properties arrived.
    DesiredProperties {
        /// Whole document or patch.
        update: TwinUpdate,
        /// Raw JSON payload.
        payload: Vec<u8>,
    },
    /// A direct method was invoked.
    MethodInvocation(MethodInvocation),
    /// A cloud-to-device message arrived.
    Message(InboundMessage),
}

/// A protocol binding driven by the client core.
pub trait Transport {
    /// Starts connecting. Completion is reported through
    /// [`TransportEvent::Connection`].
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Closes the connection. Must not fail.
    fn disconnect(&mut self);

    /// Starts receiving a cloud-to-device feature.
    fn subscribe(&mut self, feature: Feature) -> Result<(), TransportError>;

    /// Stops receiving a cloud-to-device feature.
    fn unsubscribe(&mut self, feature: Feature);

    /// Sends a telemetry message. The acknowledgement arrives later as a
    /// [`TransportEvent::TelemetryAck`] carrying the same `id`.
    fn send_telemetry(&mut self, id: OperationId, message: &Message) -> Result<(), TransportError>;

    /// Sends a reported-state document. The acknowledgement arrives later as
    /// a [`TransportEvent::ReportedStateAck`].
    fn send_reported_state(&mut self, id: OperationId, payload: &[u8]) -> Result<(), TransportError>;

    /// Answers a direct method invocation.
    fn send_method_response(&mut self, id: MethodId, payload: &[u8], status: u16) -> Result<(), TransportError>;

    /// Settles a cloud-to-device message.
    fn send_message_disposition(
        &mut self,
        token: DeliveryToken,
        disposition: Disposition,
    ) -> Result<(), TransportError>;

    /// Applies a transport-level option.
    fn set_option(&mut self, option: &TransportOption<'_>) -> Result<(), TransportError>;

    /// Advances the protocol and appends what happened to `events`, in the
    /// order it happened.
    fn poll_events(&mut self, now: Instant, events: &mut Vec<TransportEvent>);

    /// The blob upload service, if this transport offers one.
    fn upload_transport(&mut self) -> Option<&mut dyn UploadTransport> {
        None
    }
}

/// Builds a transport for a device configuration.
///
/// Closures of the form `|config| -> Result<T, TransportError>` are
/// providers.
pub trait TransportProvider {
    /// The transport produced.
    type Transport: Transport;

    /// Creates the transport.
    fn create(self, config: &ClientConfig) -> Result<Self::Transport, TransportError>;
}

impl<F, T> TransportProvider for F
where
    F: FnOnce(&ClientConfig) -> Result<T, TransportError>,
    T: Transport,
{
    type Transport = T;

    fn create(self, config: &ClientConfig) -> Result<T, TransportError> {
        self(config)
    }
}
