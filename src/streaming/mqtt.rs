// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Azure IoT Hub device channel over MQTT

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError as MqttError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, Transport,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Ack, DeliveryChannel};
use crate::config::Location;
use crate::error::{ConnectionError, DeliveryError};
use crate::security::DeviceCredentials;
use crate::sensors::TelemetryMessage;

/// IoT Hub only accepts MQTT over TLS
pub const IOT_HUB_MQTT_PORT: u16 = 8883;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 10;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How long a generated SAS token stays valid
const TOKEN_TTL_SECS: i64 = 3600;

/// One device's link to IoT Hub.
///
/// Holds the connection string for a single location; it is only exposed while
/// building the MQTT credentials and never logged.
pub struct IotHubChannel {
    location_id: String,
    credential_env: String,
    connection_string: Option<SecretString>,
}

/// Live MQTT session.
///
/// The event loop runs on its own task for the life of the session so keep-alive
/// pings go out between sends.
pub struct IotHubSession {
    client: AsyncClient,
    topic: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: JoinHandle<()>,
}

impl Drop for IotHubSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// What the event loop task reports back to `send`
#[derive(Debug)]
enum SessionEvent {
    Published(u16),
    Acked(u16),
    Lost(MqttError),
}

impl IotHubChannel {
    pub fn new(location: &Location, connection_string: Option<SecretString>) -> Self {
        Self {
            location_id: location.id.clone(),
            credential_env: location.credential_env.clone(),
            connection_string,
        }
    }

    /// Read the connection string from the location's environment variable
    pub fn from_env(location: &Location) -> Self {
        let connection_string = std::env::var(&location.credential_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::new);
        if connection_string.is_none() {
            warn!(location = %location.id, "{} is not set", location.credential_env);
        }
        Self::new(location, connection_string)
    }

    fn options(&self) -> Result<(MqttOptions, String), ConnectionError> {
        let connection_string = self.connection_string.as_ref().ok_or_else(|| {
            ConnectionError::fatal(format!("no connection string found in {}", self.credential_env))
        })?;
        let credentials = DeviceCredentials::parse(connection_string.expose_secret())
            .map_err(|e| ConnectionError::fatal(format!("{}: {}", self.credential_env, e)))?;
        let password = credentials
            .password(Utc::now() + chrono::Duration::seconds(TOKEN_TTL_SECS))
            .map_err(|e| ConnectionError::fatal(format!("{}: {}", self.credential_env, e)))?;

        let mut options = MqttOptions::new(&credentials.device_id, &credentials.host_name, IOT_HUB_MQTT_PORT);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_credentials(credentials.mqtt_username(), password.expose_secret().clone());
        options.set_transport(Transport::tls_with_default_config());

        let topic = format!("devices/{}/messages/events/", credentials.device_id);
        Ok((options, topic))
    }
}

#[async_trait]
impl DeliveryChannel for IotHubChannel {
    type Handle = IotHubSession;

    async fn connect(&self) -> Result<IotHubSession, ConnectionError> {
        let (options, topic) = self.options()?;
        debug!(location = %self.location_id, "Connecting to {}:{}", options.broker_address().0, IOT_HUB_MQTT_PORT);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(refusal(ack.code));
                    }
                    info!(location = %self.location_id, "IoT Hub connected");
                    let (tx, events) = mpsc::unbounded_channel();
                    let driver = tokio::spawn(drive(eventloop, tx, self.location_id.clone()));
                    return Ok(IotHubSession { client, topic, events, driver });
                }
                Ok(_) => {}
                Err(e) => return Err(classify_connect(e)),
            }
        }
    }

    async fn send(&self, handle: &mut IotHubSession, message: &TelemetryMessage) -> Result<Ack, DeliveryError> {
        let payload = message
            .to_json_bytes()
            .map_err(|e| DeliveryError::fatal(format!("failed to serialize message: {e}")))?;

        // acks for attempts that already timed out
        while let Ok(stale) = handle.events.try_recv() {
            if let SessionEvent::Lost(e) = stale {
                return Err(classify_delivery(e));
            }
        }

        handle
            .client
            .publish(handle.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DeliveryError::fatal(format!("MQTT request queue closed: {e}")))?;

        let mut packet_id = None;
        loop {
            match handle.events.recv().await {
                Some(SessionEvent::Published(id)) => packet_id = Some(id),
                Some(SessionEvent::Acked(id)) if packet_id == Some(id) => {
                    return Ok(Ack { packet_id: Some(id) });
                }
                Some(SessionEvent::Acked(_)) => {}
                Some(SessionEvent::Lost(e)) => return Err(classify_delivery(e)),
                None => return Err(DeliveryError::fatal("MQTT session closed")),
            }
        }
    }

    async fn close(&self, mut handle: IotHubSession) {
        if let Err(e) = handle.client.disconnect().await {
            debug!(location = %self.location_id, "MQTT disconnect request failed: {}", e);
            return;
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut handle.driver).await.is_err() {
            debug!(location = %self.location_id, "MQTT disconnect not flushed within {:?}", CLOSE_GRACE);
        }
    }
}

/// Poll the event loop until the session ends, forwarding publish traffic
async fn drive(mut eventloop: EventLoop, events: mpsc::UnboundedSender<SessionEvent>, location_id: String) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => {
                if let Some(event) = session_event(event) {
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(location = %location_id, "MQTT session lost: {}", e);
                let _ = events.send(SessionEvent::Lost(e));
                break;
            }
        }
    }
}

fn session_event(event: Event) -> Option<SessionEvent> {
    match event {
        Event::Outgoing(Outgoing::Publish(id)) => Some(SessionEvent::Published(id)),
        Event::Incoming(Packet::PubAck(ack)) => Some(SessionEvent::Acked(ack.pkid)),
        _ => None,
    }
}

fn refusal(code: ConnectReturnCode) -> ConnectionError {
    match code {
        ConnectReturnCode::ServiceUnavailable => ConnectionError::transient("IoT Hub unavailable"),
        other => ConnectionError::fatal(format!("IoT Hub refused connection: {other:?}")),
    }
}

fn classify_connect(error: MqttError) -> ConnectionError {
    match error {
        MqttError::ConnectionRefused(code) => refusal(code),
        MqttError::NotConnAck(packet) => ConnectionError::fatal(format!("expected CONNACK, got {packet:?}")),
        MqttError::Tls(e) => ConnectionError::fatal(format!("TLS setup failed: {e}")),
        other => ConnectionError::transient(other.to_string()),
    }
}

fn classify_delivery(error: MqttError) -> DeliveryError {
    match error {
        MqttError::Io(_) | MqttError::NetworkTimeout | MqttError::FlushTimeout => {
            DeliveryError::transient(error.to_string())
        }
        MqttError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable) => {
            DeliveryError::transient("IoT Hub unavailable")
        }
        other => DeliveryError::fatal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::error::FailureKind;

    fn nac() -> Location {
        SimulatorConfig::default().location("nac").cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_connection_string_is_fatal() {
        let channel = IotHubChannel::new(&nac(), None);
        let err = channel.connect().await.err().unwrap();
        assert_eq!(err.kind, FailureKind::Fatal);
        assert!(err.message.contains("NAC_CONNECTION_STRING"));
    }

    #[tokio::test]
    async fn test_malformed_connection_string_is_fatal() {
        let secret = SecretString::new("HostName=hub.azure-devices.net;SharedAccessKey=abcd".to_string());
        let channel = IotHubChannel::new(&nac(), Some(secret));
        let err = channel.connect().await.err().unwrap();
        assert_eq!(err.kind, FailureKind::Fatal);
        assert!(err.message.contains("DeviceId"));
        assert!(!err.message.contains("abcd"));
    }

    fn idle_session(events: mpsc::UnboundedReceiver<SessionEvent>) -> (IotHubSession, EventLoop) {
        let options = MqttOptions::new("nac", "hub.azure-devices.net", IOT_HUB_MQTT_PORT);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let session = IotHubSession {
            client,
            topic: "devices/nac/messages/events/".to_string(),
            events,
            driver: tokio::spawn(async {}),
        };
        (session, eventloop)
    }

    fn reading_message() -> TelemetryMessage {
        let reading = crate::sensors::ReadingState {
            ice_thickness: 30.0,
            surface_temperature: -4.0,
            snow_accumulation: 2.0,
            external_temperature: -9.0,
        };
        TelemetryMessage::new(&nac(), &reading, Utc::now())
    }

    #[test]
    fn test_only_publish_traffic_is_forwarded() {
        assert!(session_event(Event::Incoming(Packet::PingResp)).is_none());
        assert!(session_event(Event::Outgoing(Outgoing::PingReq)).is_none());
        assert!(matches!(
            session_event(Event::Outgoing(Outgoing::Publish(4))),
            Some(SessionEvent::Published(4))
        ));
        assert!(matches!(
            session_event(Event::Incoming(Packet::PubAck(rumqttc::PubAck::new(4)))),
            Some(SessionEvent::Acked(4))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_matching_puback() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (mut session, _eventloop) = idle_session(rx);
        let channel = IotHubChannel::new(&nac(), None);

        // left over from an attempt that timed out
        tx.send(SessionEvent::Acked(3)).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(SessionEvent::Published(4)).unwrap();
            tx.send(SessionEvent::Acked(3)).unwrap();
            tx.send(SessionEvent::Acked(4)).unwrap();
        });

        let ack = channel.send(&mut session, &reading_message()).await.unwrap();
        assert_eq!(ack.packet_id, Some(4));
    }

    #[tokio::test]
    async fn test_send_on_dead_session_is_fatal() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (mut session, eventloop) = idle_session(rx);
        drop(eventloop);
        let channel = IotHubChannel::new(&nac(), None);

        let err = channel.send(&mut session, &reading_message()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Fatal);
    }

    #[test]
    fn test_connack_refusals() {
        assert!(refusal(ConnectReturnCode::ServiceUnavailable).is_transient());
        assert!(!refusal(ConnectReturnCode::NotAuthorized).is_transient());
        assert!(!refusal(ConnectReturnCode::BadUserNamePassword).is_transient());
    }

    #[test]
    fn test_network_errors_are_transient() {
        assert!(classify_delivery(MqttError::NetworkTimeout).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(classify_delivery(MqttError::Io(io)).is_transient());
        assert!(!classify_delivery(MqttError::RequestsDone).is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(classify_connect(MqttError::Io(io)).is_transient());
    }
}
