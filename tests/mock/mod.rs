//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use libiot_hub::client::DeviceClient;
use libiot_hub::config::ClientConfig;
use libiot_hub::connection::{ConnectionEvent, ConnectionReason};
use libiot_hub::message::{DeliveryToken, Disposition, Message};
use libiot_hub::method::MethodId;
use libiot_hub::options::TransportOption;
use libiot_hub::queue::{OperationId, Outcome};
use libiot_hub::time::{Instant, ManualClock};
use libiot_hub::transport::error::TransportError;
use libiot_hub::transport::{Ack, Feature, Transport, TransportEvent};
use libiot_hub::upload::{Block, BlockId, UploadCompletion, UploadDestination, UploadTransport};

pub const CONNECTION_STRING: &str =
    "HostName=testhub.azure-devices.net;DeviceId=dev-1;SharedAccessKey=c2VjcmV0a2V5";

pub type Client = DeviceClient<ScriptedTransport, ManualClock>;

/// A transport that records every call and replays queued events.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    /// Queue a `Connected` event whenever `connect` succeeds.
    pub auto_connect: bool,
    /// Make every `connect` fail with this error.
    pub refuse_connect: Option<TransportError>,
    /// Acknowledge every successful send with this verdict on the next poll.
    pub auto_ack: Option<Ack>,
    /// Results returned by the next sends, `Ok` once exhausted.
    pub send_results: VecDeque<Result<(), TransportError>>,
    /// Events returned by the next poll.
    pub inbox: VecDeque<TransportEvent>,

    pub connects: u32,
    pub disconnects: Rc<Cell<u32>>,
    pub subscribed: Vec<Feature>,
    pub unsubscribed: Vec<Feature>,
    pub telemetry: Vec<(OperationId, Vec<u8>)>,
    pub reported: Vec<(OperationId, Vec<u8>)>,
    pub method_responses: Vec<(MethodId, Vec<u8>, u16)>,
    pub dispositions: Vec<(DeliveryToken, Disposition)>,
    pub options: Vec<String>,
    pub blob_service: Option<BlobService>,
}

impl ScriptedTransport {
    /// A transport that connects on the first pump.
    pub fn online() -> Self {
        Self {
            auto_connect: true,
            ..Default::default()
        }
    }

    /// An online transport that answers every send with `ack`.
    pub fn acking(ack: Ack) -> Self {
        Self {
            auto_ack: Some(ack),
            ..Self::online()
        }
    }

    pub fn push(&mut self, event: TransportEvent) {
        self.inbox.push_back(event);
    }

    pub fn drop_connection(&mut self, reason: ConnectionReason) {
        self.push(TransportEvent::Connection(ConnectionEvent::Disconnected {
            reason,
            retryable: true,
        }));
    }

    fn sent(&mut self, ack_event: impl FnOnce(Ack) -> TransportEvent) -> Result<(), TransportError> {
        let result = self.send_results.pop_front().unwrap_or(Ok(()));
        if let (Ok(()), Some(ack)) = (&result, self.auto_ack) {
            self.inbox.push_back(ack_event(ack));
        }
        result
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        if let Some(err) = self.refuse_connect {
            return Err(err);
        }
        if self.auto_connect {
            self.push(TransportEvent::Connection(ConnectionEvent::Connected));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects.set(self.disconnects.get() + 1);
    }

    fn subscribe(&mut self, feature: Feature) -> Result<(), TransportError> {
        self.subscribed.push(feature);
        Ok(())
    }

    fn unsubscribe(&mut self, feature: Feature) {
        self.unsubscribed.push(feature);
    }

    fn send_telemetry(&mut self, id: OperationId, message: &Message) -> Result<(), TransportError> {
        self.telemetry.push((id, message.payload().to_vec()));
        self.sent(|ack| TransportEvent::TelemetryAck { id, ack })
    }

    fn send_reported_state(&mut self, id: OperationId, payload: &[u8]) -> Result<(), TransportError> {
        self.reported.push((id, payload.to_vec()));
        self.sent(|ack| TransportEvent::ReportedStateAck { id, ack })
    }

    fn send_method_response(&mut self, id: MethodId, payload: &[u8], status: u16) -> Result<(), TransportError> {
        self.method_responses.push((id, payload.to_vec(), status));
        Ok(())
    }

    fn send_message_disposition(
        &mut self,
        token: DeliveryToken,
        disposition: Disposition,
    ) -> Result<(), TransportError> {
        self.dispositions.push((token, disposition));
        Ok(())
    }

    fn set_option(&mut self, option: &TransportOption<'_>) -> Result<(), TransportError> {
        self.options.push(format!("{option:?}"));
        Ok(())
    }

    fn poll_events(&mut self, _now: Instant, events: &mut Vec<TransportEvent>) {
        events.extend(self.inbox.drain(..));
    }

    fn upload_transport(&mut self) -> Option<&mut dyn UploadTransport> {
        self.blob_service
            .as_mut()
            .map(|service| service as &mut dyn UploadTransport)
    }
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct BlobService {
    pub blocks: Vec<(String, Vec<u8>, u32)>,
    pub committed: Option<Vec<u8>>,
    pub notifications: Vec<(bool, u16)>,
}

impl UploadTransport for BlobService {
    fn request_destination(&mut self, blob_name: &str) -> Result<UploadDestination, TransportError> {
        Ok(UploadDestination {
            correlation_id: heapless::String::try_from("corr").unwrap(),
            blob_uri: format!("https://store.example/uploads/{blob_name}"),
        })
    }

    fn put_block(&mut self, _destination: &UploadDestination, block: &Block<'_>) -> Result<(), TransportError> {
        assert_eq!(block.crc32, crc32fast::hash(block.data));
        self.blocks
            .push((block.id.as_str().to_string(), block.data.to_vec(), block.index));
        Ok(())
    }

    fn put_block_list(&mut self, _destination: &UploadDestination, blocks: &[BlockId]) -> Result<(), TransportError> {
        let mut blob = Vec::new();
        for id in blocks {
            let (_, data, _) = self
                .blocks
                .iter()
                .find(|(stored, _, _)| stored == id.as_str())
                .ok_or(TransportError::Rejected)?;
            blob.extend_from_slice(data);
        }
        self.committed = Some(blob);
        Ok(())
    }

    fn notify_completion(
        &mut self,
        _destination: &UploadDestination,
        completion: &UploadCompletion<'_>,
    ) -> Result<(), TransportError> {
        self.notifications
            .push((completion.success, completion.status_code));
        Ok(())
    }
}

/// Builds a client around `transport`, returning a handle on its clock.
pub fn client(transport: ScriptedTransport) -> (Client, ManualClock) {
    let clock = ManualClock::new();
    let provider = move |_: &ClientConfig| -> Result<ScriptedTransport, TransportError> { Ok(transport) };
    let client = DeviceClient::from_connection_string(CONNECTION_STRING, provider, clock.clone()).unwrap();
    (client, clock)
}

pub type OutcomeLog = Rc<RefCell<Vec<(u32, Outcome)>>>;

/// A completion callback appending `(tag, outcome)` to `log`.
pub fn record(log: &OutcomeLog, tag: u32) -> impl FnOnce(Outcome) + 'static {
    let log = log.clone();
    move |outcome: Outcome| log.borrow_mut().push((tag, outcome))
}

pub fn message(payload: &[u8]) -> Message {
    Message::new(payload.to_vec()).unwrap()
}

pub fn transport(client: &mut Client) -> &mut ScriptedTransport {
    client.transport_mut().unwrap()
}
