// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Per-device publisher: generate, send, retry, reconnect

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::Backoff;
use crate::config::{Location, SimulatorConfig};
use crate::error::{ConnectionError, DeliveryError};
use crate::sensors::{ReadingModel, ReadingState, TelemetryMessage};
use crate::streaming::DeliveryChannel;

/// Where a publisher is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublisherState {
    Disconnected,
    Connecting,
    Ready,
    Sending,
    Backoff,
    ShuttingDown,
    Closed,
    /// Gave up after a fatal connection error
    Failed,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a publisher did over its lifetime
#[derive(Debug, Clone, Serialize)]
pub struct PublisherReport {
    pub location: String,
    pub state: PublisherState,
    /// Messages acknowledged by the endpoint
    pub sent: u64,
    /// Send attempts beyond the first for some message
    pub retries: u64,
    /// Messages given up on
    pub dropped: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
    pub last_reading: ReadingState,
}

enum Connect<H> {
    Connected(H),
    Failed(ConnectionError),
    Cancelled,
}

enum Tick {
    Done,
    Reconnect,
    Cancelled,
}

/// A drawn reading and the message carrying it, until the endpoint acks it
struct Pending {
    reading: ReadingState,
    message: TelemetryMessage,
    /// Already survived one session loss
    resent: bool,
}

/// Owns one location's reading state and delivery channel and runs its tick loop.
///
/// The reading state only advances when a message is acknowledged, so a retried
/// or re-drawn message is always within `variation` of the last delivered one.
pub struct DevicePublisher<C: DeliveryChannel> {
    location: Location,
    config: Arc<SimulatorConfig>,
    channel: C,
    model: ReadingModel,
    reading: ReadingState,
    /// Message whose session died under it; resent right after reconnecting
    pending: Option<Pending>,
    rng: ChaCha8Rng,
    state_tx: watch::Sender<PublisherState>,
    sent: u64,
    retries: u64,
    dropped: u64,
    reconnects: u64,
    last_error: Option<String>,
}

impl<C: DeliveryChannel> DevicePublisher<C> {
    pub fn new(location: Location, config: Arc<SimulatorConfig>, channel: C) -> Self {
        Self::with_rng(location, config, channel, ChaCha8Rng::from_entropy())
    }

    /// Deterministic publisher for reproducible runs
    pub fn with_seed(location: Location, config: Arc<SimulatorConfig>, channel: C, seed: u64) -> Self {
        Self::with_rng(location, config, channel, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(location: Location, config: Arc<SimulatorConfig>, channel: C, mut rng: ChaCha8Rng) -> Self {
        let model = ReadingModel::new(location.device);
        let reading = model.initial(&mut rng);
        let (state_tx, _) = watch::channel(PublisherState::Disconnected);
        Self {
            location,
            config,
            channel,
            model,
            reading,
            pending: None,
            rng,
            state_tx,
            sent: 0,
            retries: 0,
            dropped: 0,
            reconnects: 0,
            last_error: None,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Last acknowledged reading (the initial draw before the first ack)
    pub fn reading(&self) -> &ReadingState {
        &self.reading
    }

    pub fn state(&self) -> PublisherState {
        *self.state_tx.borrow()
    }

    /// Follow state transitions from outside the task
    pub fn subscribe_state(&self) -> watch::Receiver<PublisherState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown or a fatal connection error
    pub async fn run(mut self, shutdown: CancellationToken) -> PublisherReport {
        info!(location = %self.location.id, "Starting sensor simulation for {}", self.location.name);

        // Ticks are anchored to the schedule, not to when the last send finished
        let mut ticker = interval(self.config.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let mut handle = match self.connect(&shutdown).await {
                Connect::Connected(handle) => handle,
                Connect::Cancelled => return self.finish(None).await,
                Connect::Failed(e) => {
                    error!(location = %self.location.id, "Giving up on {}: {}", self.location.name, e);
                    self.last_error = Some(e.to_string());
                    self.transition(PublisherState::Failed);
                    return self.report();
                }
            };

            loop {
                let outcome = match self.pending.take() {
                    Some(pending) => {
                        debug!(location = %self.location.id, "Resending message lost with the previous session");
                        self.deliver(&mut handle, pending, &shutdown).await
                    }
                    None => {
                        self.transition(PublisherState::Ready);
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => return self.finish(Some(handle)).await,
                            _ = ticker.tick() => {}
                        }
                        let pending = self.draw();
                        self.deliver(&mut handle, pending, &shutdown).await
                    }
                };

                match outcome {
                    Tick::Done => {}
                    Tick::Cancelled => return self.finish(Some(handle)).await,
                    Tick::Reconnect => {
                        self.close(handle).await;
                        self.reconnects += 1;
                        self.transition(PublisherState::Disconnected);
                        break;
                    }
                }
            }
        }
    }

    /// Connect, backing off on transient errors for as long as it takes
    async fn connect(&mut self, shutdown: &CancellationToken) -> Connect<C::Handle> {
        let mut backoff = Backoff::new(&self.config.retry);
        loop {
            self.transition(PublisherState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Connect::Cancelled,
                result = timeout(self.config.connect_timeout, self.channel.connect()) => result,
            };
            let error = match attempt {
                Ok(Ok(handle)) => {
                    debug!(location = %self.location.id, "Connected after {} failed attempts", backoff.attempt());
                    return Connect::Connected(handle);
                }
                Ok(Err(e)) if !e.is_transient() => return Connect::Failed(e),
                Ok(Err(e)) => e,
                Err(_) => ConnectionError::transient(format!("connect timed out after {:?}", self.config.connect_timeout)),
            };

            let delay = backoff.next_delay(&mut self.rng);
            warn!(
                location = %self.location.id,
                "Could not connect {}: {} (retrying in {:?})", self.location.name, error, delay
            );
            self.last_error = Some(error.to_string());
            if !self.pause(delay, shutdown).await {
                return Connect::Cancelled;
            }
        }
    }

    /// Fresh reading one step away from the last acknowledged one
    fn draw(&mut self) -> Pending {
        let reading = self.model.next(&self.reading, &mut self.rng);
        let message = TelemetryMessage::new(&self.location, &reading, Utc::now());
        Pending { reading, message, resent: false }
    }

    /// Send one message, retrying transient failures of the same message
    async fn deliver(&mut self, handle: &mut C::Handle, pending: Pending, shutdown: &CancellationToken) -> Tick {
        let Pending { reading, message, resent } = pending;
        let max_attempts = self.config.retry.max_send_attempts;
        let mut backoff = Backoff::new(&self.config.retry);

        for attempt in 1..=max_attempts {
            self.transition(PublisherState::Sending);
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Tick::Cancelled,
                result = timeout(self.config.send_timeout, self.channel.send(handle, &message)) => result,
            };
            let error = match outcome {
                Ok(Ok(ack)) => {
                    trace!(location = %self.location.id, "ack {:?}", ack);
                    info!(location = %self.location.id, "{}", message.summary());
                    self.reading = reading;
                    self.sent += 1;
                    return Tick::Done;
                }
                Ok(Err(e)) => e,
                Err(_) => DeliveryError::transient(format!("send timed out after {:?}", self.config.send_timeout)),
            };
            self.last_error = Some(error.to_string());

            if !error.is_transient() {
                if resent {
                    error!(
                        location = %self.location.id,
                        "Dropping message from {} after losing a second session: {}", self.location.id, error
                    );
                    self.dropped += 1;
                } else {
                    error!(
                        location = %self.location.id,
                        "Error sending message from {}: {}; reconnecting", self.location.id, error
                    );
                    self.pending = Some(Pending { reading, message, resent: true });
                }
                return Tick::Reconnect;
            }
            if attempt == max_attempts {
                warn!(
                    location = %self.location.id,
                    "Dropping message from {} after {} attempts: {}", self.location.id, attempt, error
                );
                self.dropped += 1;
                return Tick::Done;
            }

            let delay = backoff.next_delay(&mut self.rng);
            warn!(
                location = %self.location.id,
                "Send attempt {}/{} from {} failed: {} (retrying in {:?})",
                attempt, max_attempts, self.location.id, error, delay
            );
            self.retries += 1;
            if !self.pause(delay, shutdown).await {
                return Tick::Cancelled;
            }
        }
        Tick::Done
    }

    /// Backoff sleep; false if shutdown arrived first
    async fn pause(&mut self, delay: Duration, shutdown: &CancellationToken) -> bool {
        self.transition(PublisherState::Backoff);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn finish(self, handle: Option<C::Handle>) -> PublisherReport {
        self.transition(PublisherState::ShuttingDown);
        if let Some(handle) = handle {
            self.close(handle).await;
        }
        self.transition(PublisherState::Closed);
        info!(location = %self.location.id, "Stopped sensor for {}", self.location.name);
        self.report()
    }

    async fn close(&self, handle: C::Handle) {
        if timeout(self.config.send_timeout, self.channel.close(handle)).await.is_err() {
            warn!(location = %self.location.id, "Channel close timed out after {:?}", self.config.send_timeout);
        }
    }

    fn transition(&self, next: PublisherState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            trace!(location = %self.location.id, "{} -> {}", previous, next);
        }
    }

    fn report(&self) -> PublisherReport {
        PublisherReport {
            location: self.location.id.clone(),
            state: self.state(),
            sent: self.sent,
            retries: self.retries,
            dropped: self.dropped,
            reconnects: self.reconnects,
            last_error: self.last_error.clone(),
            last_reading: self.reading,
        }
    }
}
