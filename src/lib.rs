//! # libiot-hub - device-to-cloud client core
//!
//! A single-threaded, pump-driven client core for cloud-connected devices.
//! It queues telemetry and reported-state updates, retries them under a
//! configurable policy, tracks the connection, delivers desired twin
//! properties, dispatches direct methods, settles cloud-to-device messages
//! and runs block-wise blob uploads. The wire protocol lives behind the
//! [`transport::Transport`] trait; the core never opens a socket itself.
//!
//! The library targets `no_std` + `alloc` and runs on microcontrollers as
//! well as hosted systems.
//!
//! ## Architecture
//!
//! ```text
//!   application
//!       │ send_event_async / send_reported_state / set_*_callback
//!       ▼
//!  ┌───────────────────────── DeviceClient ─────────────────────────┐
//!  │  MessageQueue   RetryEngine   ConnectionTracker                │
//!  │  TwinSynchronizer   MethodDispatcher   UploadCoordinator       │
//!  └───────────────┬───────────────────────────────▲────────────────┘
//!        connect / send / respond          poll_events (acks, twin,
//!                  ▼                       methods, messages, link)
//!  ┌──────────────────────────── Transport ─────────────────────────┐
//!  │            MQTT / AMQP / HTTP binding (not part of this crate) │
//!  └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libiot_hub::client::DeviceClient;
//! use libiot_hub::config::ClientConfig;
//! use libiot_hub::transport::error::TransportError;
//! use libiot_hub::message::Message;
//! use libiot_hub::time::ManualClock;
//! # use libiot_hub::transport::{Feature, Transport, TransportEvent};
//! # use libiot_hub::queue::OperationId;
//! # use libiot_hub::method::MethodId;
//! # use libiot_hub::message::{DeliveryToken, Disposition};
//! # use libiot_hub::options::TransportOption;
//! # use libiot_hub::time::Instant;
//! # struct Mqtt;
//! # impl Transport for Mqtt {
//! #     fn connect(&mut self) -> Result<(), TransportError> { Ok(()) }
//! #     fn disconnect(&mut self) {}
//! #     fn subscribe(&mut self, _: Feature) -> Result<(), TransportError> { Ok(()) }
//! #     fn unsubscribe(&mut self, _: Feature) {}
//! #     fn send_telemetry(&mut self, _: OperationId, _: &Message) -> Result<(), TransportError> { Ok(()) }
//! #     fn send_reported_state(&mut self, _: OperationId, _: &[u8]) -> Result<(), TransportError> { Ok(()) }
//! #     fn send_method_response(&mut self, _: MethodId, _: &[u8], _: u16) -> Result<(), TransportError> { Ok(()) }
//! #     fn send_message_disposition(&mut self, _: DeliveryToken, _: Disposition) -> Result<(), TransportError> { Ok(()) }
//! #     fn set_option(&mut self, _: &TransportOption<'_>) -> Result<(), TransportError> { Ok(()) }
//! #     fn poll_events(&mut self, _: Instant, _: &mut Vec<TransportEvent>) {}
//! # }
//!
//! let mut client = DeviceClient::from_connection_string(
//!     "HostName=myhub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=c2VjcmV0",
//!     |_: &ClientConfig| -> Result<Mqtt, TransportError> { Ok(Mqtt) },
//!     ManualClock::new(),
//! )?;
//!
//! client.send_event_async(Message::new(b"{\"t\":21.5}".to_vec())?, |outcome| {
//!     // runs from a later do_work()
//!     let _ = outcome;
//! })?;
//!
//! loop {
//!     client.do_work()?;
//! #   break;
//! }
//! # Ok::<(), libiot_hub::error::Error>(())
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support, adds [`time::SystemClock`]
//! - `defmt`: Enable defmt logging support for embedded debugging

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

extern crate alloc;

#[macro_use]
mod fmt;

/// The client handle and its pump.
pub mod client;

/// Device configuration and connection string parsing.
pub mod config;

/// Connection state tracking.
pub mod connection;

/// Errors returned synchronously by client operations.
pub mod error;

/// Telemetry and cloud-to-device message types.
pub mod message;

/// Direct method dispatch.
pub mod method;

/// Named client options.
pub mod options;

/// Outbound operation queue.
pub mod queue;

/// Retry policies and scheduling.
pub mod retry;

/// Monotonic time sources.
pub mod time;

/// Transport binding abstraction.
pub mod transport;

/// Device twin synchronisation.
pub mod twin;

/// Block-wise blob upload.
pub mod upload;

pub use client::{DeviceClient, SendStatus};
pub use error::{Error, Result};
