//! # Device client
//!
//! [`DeviceClient`] is the single owning handle of the client core. It owns
//! the transport, the outbound queue, the retry engine, the connection
//! tracker, the twin and method state and the application callbacks. Nothing
//! happens on its own: every state change is driven by [`DeviceClient::do_work`].
//!
//! ```text
//!   do_work(now)
//!     │
//!     ├─ 1. release retries held by the previous pump, connect / reconnect
//!     ├─ 2. poll transport events
//!     ├─ 3. fold events: connection, acks, desired twin, methods, messages
//!     ├─ 4. time out operations past the retry horizon or message timeout
//!     ├─ 5. send due operations in per-kind FIFO order (connected only)
//!     └─ 6. deliver completion callbacks, in completion order
//! ```
//!
//! Callbacks run on the pump's call stack while the handle is mutably
//! borrowed, so they cannot call back into the client. They may capture
//! their own state (e.g. an `Rc<RefCell<_>>`) and the application acts on it
//! after `do_work` returns.
//!
//! Once [`DeviceClient::destroy`] has run, every operation fails with
//! [`Error::InvalidArgument`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::time::Duration;

use crate::config::ClientConfig;
use crate::connection::{
    ConnectionEvent, ConnectionReason, ConnectionState, ConnectionStatusCallback, ConnectionTracker,
};
use crate::error::{Error, Result};
use crate::message::{Disposition, InboundMessage, Message, MessageCallback};
use crate::method::{MethodCallback, MethodDispatcher, MethodId};
use crate::options::{ClientOption, MAX_PRODUCT_INFO_LEN, OptionValue, TransportOption};
use crate::queue::{MessageQueue, OperationId, OperationKind, OperationStatus, Outcome};
use crate::retry::{RetryConfig, RetryDecision, RetryEngine, RetryPolicy};
use crate::time::{Clock, Instant};
use crate::transport::error::TransportError;
use crate::transport::{Ack, Feature, Transport, TransportEvent, TransportProvider};
use crate::twin::{TwinCallback, TwinSynchronizer};
use crate::upload::{BlockSource, UploadCoordinator, UploadReport};

// Mixed into the retry RNG seed with the device id and the creation time.
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Whether outbound work is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// Nothing queued and nothing awaiting callback delivery.
    Idle,
    /// At least one operation has not reached its callback yet.
    Busy,
}

/// The device client handle.
pub struct DeviceClient<T: Transport, C: Clock> {
    clock: C,
    core: Option<Core<T>>,
}

struct Core<T> {
    config: ClientConfig,
    transport: T,
    queue: MessageQueue,
    retry: RetryEngine,
    connection: ConnectionTracker,
    twin: TwinSynchronizer,
    methods: MethodDispatcher,
    message_callback: Option<MessageCallback>,
    last_message_received_at: Option<Instant>,
    message_timeout: Option<Duration>,
    product_info: heapless::String<MAX_PRODUCT_INFO_LEN>,
    uploader: UploadCoordinator,
    events: Vec<TransportEvent>,
}

impl<T: Transport, C: Clock> DeviceClient<T, C> {
    /// Creates a client from a device connection string.
    pub fn from_connection_string<P>(connection_string: &str, provider: P, clock: C) -> Result<Self>
    where
        P: TransportProvider<Transport = T>,
    {
        let config = ClientConfig::from_connection_string(connection_string)?;
        Self::new(config, provider, clock)
    }

    /// Creates a client from a configuration, building the transport with
    /// `provider`.
    pub fn new<P>(config: ClientConfig, provider: P, clock: C) -> Result<Self>
    where
        P: TransportProvider<Transport = T>,
    {
        let transport = provider.create(&config)?;
        Ok(Self::with_transport(config, transport, clock))
    }

    /// Creates a client whose credentials come from a device authentication
    /// provider.
    pub fn from_device_auth<P>(iothub_uri: &str, device_id: &str, provider: P, clock: C) -> Result<Self>
    where
        P: TransportProvider<Transport = T>,
    {
        let config = ClientConfig::from_device_auth(iothub_uri, device_id)?;
        Self::new(config, provider, clock)
    }

    /// Creates a client around an existing transport.
    pub fn with_transport(config: ClientConfig, transport: T, clock: C) -> Self {
        let now = clock.now();
        let seed = SEED_MIX ^ u64::from(crc32fast::hash(config.device_id.as_bytes())) ^ now.as_millis();
        info!("device client created for {}", config.device_id.as_str());
        Self {
            clock,
            core: Some(Core {
                config,
                transport,
                queue: MessageQueue::new(),
                retry: RetryEngine::new(RetryConfig::default(), seed),
                connection: ConnectionTracker::new(now),
                twin: TwinSynchronizer::new(),
                methods: MethodDispatcher::new(),
                message_callback: None,
                last_message_received_at: None,
                message_timeout: None,
                product_info: heapless::String::new(),
                uploader: UploadCoordinator::default(),
                events: Vec::new(),
            }),
        }
    }

    fn core(&mut self) -> Result<&mut Core<T>> {
        self.core.as_mut().ok_or(Error::InvalidArgument)
    }

    fn core_ref(&self) -> Result<&Core<T>> {
        self.core.as_ref().ok_or(Error::InvalidArgument)
    }

    /// Disconnects and abandons every pending operation without invoking its
    /// callback. The handle is unusable afterwards.
    pub fn destroy(&mut self) -> Result<()> {
        let mut core = self.core.take().ok_or(Error::InvalidArgument)?;
        core.shutdown();
        Ok(())
    }

    /// Runs one pump cycle.
    pub fn do_work(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.core()?.pump(now);
        Ok(())
    }

    /// Queues a telemetry message. `callback` runs exactly once, from a later
    /// `do_work`, with the final outcome.
    pub fn send_event_async<F>(&mut self, message: Message, callback: F) -> Result<OperationId>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let now = self.clock.now();
        self.core()?
            .queue
            .enqueue(OperationKind::Telemetry, message, Box::new(callback), now)
    }

    /// Whether any submission is still outstanding.
    pub fn get_send_status(&self) -> Result<SendStatus> {
        let core = self.core_ref()?;
        Ok(if core.queue.is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        })
    }

    /// Registers or clears the cloud-to-device message handler, subscribing
    /// or unsubscribing the transport accordingly.
    pub fn set_message_callback(&mut self, callback: Option<MessageCallback>) -> Result<()> {
        let core = self.core()?;
        let was = core.message_callback.is_some();
        core.toggle_feature(Feature::CloudToDeviceMessages, was, callback.is_some())?;
        core.message_callback = callback;
        Ok(())
    }

    /// Registers or clears the connection status callback.
    pub fn set_connection_status_callback(&mut self, callback: Option<ConnectionStatusCallback>) -> Result<()> {
        self.core()?.connection.set_callback(callback);
        Ok(())
    }

    /// Replaces the retry policy. Only decisions made from now on are
    /// affected. A zero `timeout_limit` means no retry horizon.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy, timeout_limit: Duration) -> Result<()> {
        let core = self.core()?;
        info!("retry policy {}", policy);
        core.retry.set_config(RetryConfig {
            policy,
            timeout_limit,
        });
        Ok(())
    }

    /// The active retry configuration.
    pub fn get_retry_policy(&self) -> Result<RetryConfig> {
        Ok(self.core_ref()?.retry.config())
    }

    /// When the last cloud-to-device message arrived.
    ///
    /// Fails with [`Error::NoMessageReceived`] until the first one.
    pub fn get_last_message_receive_time(&self) -> Result<Instant> {
        self.core_ref()?
            .last_message_received_at
            .ok_or(Error::NoMessageReceived)
    }

    /// Sets a named option. See [`crate::options`] for the accepted names.
    pub fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> Result<()> {
        let core = self.core()?;
        let option = ClientOption::parse(name, value)?;
        core.apply_option(option)
    }

    /// The product information string set through `product_info`.
    pub fn product_info(&self) -> Result<&str> {
        Ok(self.core_ref()?.product_info.as_str())
    }

    /// Registers or clears the desired-property callback, subscribing or
    /// unsubscribing the transport twin feature accordingly.
    pub fn set_device_twin_callback(&mut self, callback: Option<TwinCallback>) -> Result<()> {
        let core = self.core()?;
        let was = core.twin.has_callback();
        core.toggle_feature(Feature::DeviceTwin, was, callback.is_some())?;
        core.twin.set_callback(callback);
        Ok(())
    }

    /// Queues a reported-properties update. `callback` receives the service
    /// status code, or the failure or timeout.
    pub fn send_reported_state<F>(&mut self, reported: &[u8], callback: F) -> Result<OperationId>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let now = self.clock.now();
        let core = self.core()?;
        let message = Message::new(reported.to_vec())?;
        core.queue
            .enqueue(OperationKind::ReportedState, message, Box::new(callback), now)
    }

    /// Registers or clears the direct method handler, subscribing or
    /// unsubscribing the transport method feature accordingly.
    pub fn set_device_method_callback(&mut self, callback: Option<MethodCallback>) -> Result<()> {
        let core = self.core()?;
        let was = core.methods.has_handler();
        core.toggle_feature(Feature::DeviceMethods, was, callback.is_some())?;
        core.methods.set_handler(callback);
        Ok(())
    }

    /// Answers a deferred method invocation.
    ///
    /// Fails with [`Error::InvalidArgument`] for an unknown or already
    /// answered `method_id`.
    pub fn device_method_response(&mut self, method_id: MethodId, payload: &[u8], status: u16) -> Result<()> {
        let core = self.core()?;
        core.methods.respond(&mut core.transport, method_id, payload, status)
    }

    /// Uploads `data` as one blob, split into blocks of the configured size.
    ///
    /// Fails with [`Error::NotSupported`] when the transport has no upload
    /// service and with [`Error::Upload`] when the upload was aborted.
    pub fn upload_to_blob(&mut self, destination_name: &str, data: &[u8]) -> Result<UploadReport> {
        let core = self.core()?;
        if destination_name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let uploader = core.uploader;
        let transport = core.transport.upload_transport().ok_or(Error::NotSupported)?;
        finish_upload(uploader.upload_buffer(transport, destination_name, data))
    }

    /// Uploads a blob whose content is pulled from `source` block by block.
    pub fn upload_multiple_blocks_to_blob<S>(&mut self, destination_name: &str, source: &mut S) -> Result<UploadReport>
    where
        S: BlockSource + ?Sized,
    {
        let core = self.core()?;
        if destination_name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let uploader = core.uploader;
        let transport = core.transport.upload_transport().ok_or(Error::NotSupported)?;
        finish_upload(uploader.upload(transport, destination_name, source))
    }

    /// The configuration the client was built from.
    pub fn config(&self) -> Result<&ClientConfig> {
        Ok(&self.core_ref()?.config)
    }

    /// Current connection state.
    pub fn connection_state(&self) -> Result<ConnectionState> {
        Ok(self.core_ref()?.connection.state())
    }

    /// Highest desired-properties `$version` seen so far.
    pub fn last_desired_version(&self) -> Result<Option<u64>> {
        Ok(self.core_ref()?.twin.last_desired_version())
    }

    /// Number of submissions whose callback has not run yet.
    pub fn pending_operations(&self) -> Result<usize> {
        Ok(self.core_ref()?.queue.len())
    }

    /// Status of a submission whose callback has not run yet.
    pub fn operation_status(&self, id: OperationId) -> Result<Option<OperationStatus>> {
        Ok(self.core_ref()?.queue.status(id))
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> Result<&T> {
        Ok(&self.core_ref()?.transport)
    }

    /// Get a mutable reference to the transport
    pub fn transport_mut(&mut self) -> Result<&mut T> {
        Ok(&mut self.core()?.transport)
    }
}

impl<T: Transport, C: Clock> Drop for DeviceClient<T, C> {
    fn drop(&mut self) {
        if let Some(mut core) = self.core.take() {
            core.shutdown();
        }
    }
}

impl<T: Transport, C: Clock> fmt::Debug for DeviceClient<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.core {
            Some(core) => f
                .debug_struct("DeviceClient")
                .field("device_id", &core.config.device_id)
                .field("connection", &core.connection.state())
                .field("queue", &core.queue)
                .field("retry", &core.retry.config())
                .finish_non_exhaustive(),
            None => f.write_str("DeviceClient(destroyed)"),
        }
    }
}

fn finish_upload(report: UploadReport) -> Result<UploadReport> {
    match report.error {
        Some(err) => Err(Error::Upload(err)),
        None => Ok(report),
    }
}

impl<T: Transport> Core<T> {
    fn pump(&mut self, now: Instant) {
        self.queue.release_held();
        self.drive_connection(now);

        let mut events = mem::take(&mut self.events);
        self.transport.poll_events(now, &mut events);
        for event in events.drain(..) {
            self.handle_event(event, now);
        }
        self.events = events;

        self.expire(now);
        if self.connection.is_connected() {
            self.send_due(now);
        }

        while let Some(op) = self.queue.pop_completed() {
            trace!("delivering outcome of operation {}", op.id());
            op.deliver();
        }
    }

    fn drive_connection(&mut self, now: Instant) {
        if self.connection.needs_initial_connect() {
            self.connection.connecting(now);
            let result = self.transport.connect();
            self.on_connect_result(result, now);
        } else if self.connection.reconnect_due(now) {
            let since = self.connection.retrying_since().unwrap_or(now);
            let attempt = self.connection.record_reconnect_attempt();
            match self.retry.evaluate(since, attempt, now) {
                RetryDecision::TimedOut => {
                    warn!("reconnecting exceeded the retry horizon");
                    self.connection.stop(ConnectionReason::RetryExpired, now);
                    return;
                }
                RetryDecision::RetryAt(at) => self.connection.schedule_reconnect(at),
                RetryDecision::GiveUp => self.connection.give_up_reconnecting(),
            }
            info!("reconnect attempt {}", attempt);
            let result = self.transport.connect();
            self.on_connect_result(result, now);
        }
    }

    fn on_connect_result(&mut self, result: core::result::Result<(), TransportError>, now: Instant) {
        if let Err(err) = result {
            warn!("connect failed: {}", err);
            let reason = match err {
                TransportError::Rejected => ConnectionReason::BadCredential,
                _ => ConnectionReason::CommunicationError,
            };
            self.connection.on_event(
                ConnectionEvent::Disconnected {
                    reason,
                    retryable: err.is_transient(),
                },
                now,
            );
        }
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connection(event) => {
                let was_connected = self.connection.is_connected();
                self.connection.on_event(event, now);
                if was_connected && !self.connection.is_connected() {
                    // Acknowledgements for in-flight work will not arrive.
                    for id in self.queue.in_flight() {
                        self.retry_failed(id, now);
                    }
                }
            }
            TransportEvent::TelemetryAck { id, ack } | TransportEvent::ReportedStateAck { id, ack } => {
                self.on_ack(id, ack, now)
            }
            TransportEvent::DesiredProperties { update, payload } => self.twin.on_desired(update, &payload),
            TransportEvent::MethodInvocation(invocation) => self.methods.dispatch(invocation, &mut self.transport),
            TransportEvent::Message(inbound) => self.on_message(inbound, now),
        }
    }

    fn on_ack(&mut self, id: OperationId, ack: Ack, now: Instant) {
        match ack {
            Ack::Success(status) => {
                self.queue.complete(id, Outcome::Acked { status });
            }
            Ack::Rejected(status) => {
                warn!("operation {} rejected with {}", id, status);
                self.queue.complete(id, Outcome::Failed { status: Some(status) });
            }
            Ack::Transient => self.retry_failed(id, now),
        }
    }

    fn retry_failed(&mut self, id: OperationId, now: Instant) {
        let Some(op) = self
            .queue
            .get(id)
            .filter(|op| op.status() == OperationStatus::InFlight)
        else {
            debug!("ignoring transient failure of operation {}", id);
            return;
        };
        match self.retry.evaluate(op.enqueued_at(), op.attempt_count(), now) {
            RetryDecision::RetryAt(at) => {
                debug!("operation {} retries at {}", id, at);
                self.queue.reschedule(id, at);
            }
            RetryDecision::GiveUp => {
                self.queue.complete(id, Outcome::Failed { status: None });
            }
            RetryDecision::TimedOut => {
                self.queue.complete(id, Outcome::TimedOut);
            }
        }
    }

    fn on_message(&mut self, inbound: InboundMessage, now: Instant) {
        self.last_message_received_at = Some(now);
        let disposition = match self.message_callback.as_mut() {
            Some(callback) => callback(&inbound.message),
            None => {
                debug!("no message callback, abandoning message");
                Disposition::Abandoned
            }
        };
        if let Err(err) = self.transport.send_message_disposition(inbound.token, disposition) {
            error!("message disposition failed: {}", err);
        }
    }

    fn expire(&mut self, now: Instant) {
        let retry = &self.retry;
        let message_timeout = self.message_timeout;
        let expired = self.queue.expire(|op| {
            let age = now.saturating_duration_since(op.enqueued_at());
            retry.is_expired(op.enqueued_at(), now) || message_timeout.is_some_and(|limit| age > limit)
        });
        if expired > 0 {
            info!("{} operations timed out", expired);
        }
    }

    fn send_due(&mut self, now: Instant) {
        // A lane stalls after a transient refusal so later entries never
        // overtake the one being retried.
        let mut stalled = [false; 2];
        for id in self.queue.drain_due(now) {
            let Some(op) = self.queue.get(id) else {
                continue;
            };
            let lane = op.kind().index();
            if stalled[lane] {
                self.queue.requeue(id);
                continue;
            }
            let sent = match op.kind() {
                OperationKind::Telemetry => self.transport.send_telemetry(id, op.message()),
                OperationKind::ReportedState => self.transport.send_reported_state(id, op.message().payload()),
            };
            match sent {
                Ok(()) => trace!("sent operation {}", id),
                Err(err) if err.is_transient() => {
                    stalled[lane] = true;
                    self.retry_failed(id, now);
                }
                Err(err) => {
                    error!("operation {} refused: {}", id, err);
                    self.queue.complete(id, Outcome::Failed { status: None });
                }
            }
        }
    }

    fn toggle_feature(&mut self, feature: Feature, was: bool, wants: bool) -> Result<()> {
        if wants && !was {
            self.transport.subscribe(feature)?;
        } else if was && !wants {
            self.transport.unsubscribe(feature);
        }
        Ok(())
    }

    fn apply_option(&mut self, option: ClientOption<'_>) -> Result<()> {
        match option {
            ClientOption::Transport(option) => self.transport.set_option(&option)?,
            ClientOption::ProductInfo(info) => {
                let stored = heapless::String::try_from(info).map_err(|_| Error::InvalidArgument)?;
                self.transport.set_option(&TransportOption::ProductInfo(info))?;
                self.product_info = stored;
            }
            ClientOption::MessageTimeout(timeout) => self.message_timeout = timeout,
            ClientOption::RetryInterval(interval) => self.retry.set_interval(interval),
            ClientOption::BlobBlockSize(size) => self.uploader = UploadCoordinator::new(size),
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.connection.set_callback(None);
        self.queue.close();
        self.transport.disconnect();
        info!("device client for {} destroyed", self.config.device_id.as_str());
    }
}
