//! Demo channel that logs messages instead of sending them

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Ack, DeliveryChannel};
use crate::error::{ConnectionError, DeliveryError};
use crate::sensors::TelemetryMessage;

/// Logs every serialized message and acks it immediately
pub struct ConsoleChannel {
    location_id: String,
}

/// Session state for [`ConsoleChannel`]
#[derive(Debug, Default)]
pub struct ConsoleSession {
    pub messages: u64,
}

impl ConsoleChannel {
    pub fn new(location_id: &str) -> Self {
        Self { location_id: location_id.to_string() }
    }
}

#[async_trait]
impl DeliveryChannel for ConsoleChannel {
    type Handle = ConsoleSession;

    async fn connect(&self) -> Result<ConsoleSession, ConnectionError> {
        debug!(location = %self.location_id, "Console channel opened");
        Ok(ConsoleSession::default())
    }

    async fn send(&self, handle: &mut ConsoleSession, message: &TelemetryMessage) -> Result<Ack, DeliveryError> {
        let payload = message
            .to_json()
            .map_err(|e| DeliveryError::fatal(format!("failed to serialize message: {e}")))?;
        handle.messages += 1;
        info!(location = %self.location_id, "payload {}", payload);
        Ok(Ack::default())
    }

    async fn close(&self, handle: ConsoleSession) {
        debug!(location = %self.location_id, "Console channel closed after {} messages", handle.messages);
    }
}
