//! Streaming module - delivery channels to the ingestion endpoint
//!
//! A [`DeliveryChannel`] knows how to open a session, push one message and wait
//! for the endpoint's acknowledgement, and close the session again. It never
//! retries on its own; the publisher decides what to do with a failure based on
//! its [`FailureKind`](crate::error::FailureKind).

mod console;
mod mqtt;
mod scripted;

pub use console::{ConsoleChannel, ConsoleSession};
pub use mqtt::{IotHubChannel, IotHubSession, IOT_HUB_MQTT_PORT};
pub use scripted::{Outcome, ScriptedChannel, ScriptedSession};

use async_trait::async_trait;

use crate::error::{ConnectionError, DeliveryError};
use crate::sensors::TelemetryMessage;

/// Confirmation that the endpoint accepted a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Transport packet id, when the transport has one
    pub packet_id: Option<u16>,
}

/// Transport to the ingestion endpoint for a single device
#[async_trait]
pub trait DeliveryChannel: Send + Sync + 'static {
    /// Open session; owned exclusively by one publisher
    type Handle: Send + 'static;

    /// Establish a session
    async fn connect(&self) -> Result<Self::Handle, ConnectionError>;

    /// Deliver one message and wait for its acknowledgement.
    ///
    /// At most one attempt per call.
    async fn send(&self, handle: &mut Self::Handle, message: &TelemetryMessage) -> Result<Ack, DeliveryError>;

    /// Tear the session down. Errors are logged, not returned.
    async fn close(&self, handle: Self::Handle);
}
