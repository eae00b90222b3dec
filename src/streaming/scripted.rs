//! Scripted in-memory channel for exercising publisher failure handling
//!
//! Outcomes are queued up front and consumed one per call; once a queue runs dry
//! every further call succeeds. Clones share the same script and history.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Ack, DeliveryChannel};
use crate::error::{ConnectionError, DeliveryError};
use crate::sensors::TelemetryMessage;

/// What a scripted call does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Transient,
    Fatal,
    /// Never completes; only a timeout or shutdown gets the caller out
    Hang,
}

#[derive(Default)]
struct Script {
    connects: VecDeque<Outcome>,
    sends: VecDeque<Outcome>,
    hang_on_close: bool,
    connect_attempts: usize,
    closes: usize,
    attempts: Vec<TelemetryMessage>,
    delivered: Vec<TelemetryMessage>,
}

#[derive(Clone, Default)]
pub struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
}

/// Session handed out by [`ScriptedChannel::connect`]
#[derive(Debug)]
pub struct ScriptedSession {
    pub session: usize,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connects(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().connects.extend(outcomes);
        self
    }

    pub fn with_sends(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().sends.extend(outcomes);
        self
    }

    /// Make `close` block forever
    pub fn hanging_close(self) -> Self {
        self.script.lock().hang_on_close = true;
        self
    }

    /// Every message passed to `send`, including failed attempts
    pub fn attempts(&self) -> Vec<TelemetryMessage> {
        self.script.lock().attempts.clone()
    }

    /// Messages that were acknowledged
    pub fn delivered(&self) -> Vec<TelemetryMessage> {
        self.script.lock().delivered.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.script.lock().connect_attempts
    }

    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedChannel {
    type Handle = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession, ConnectionError> {
        let (outcome, session) = {
            let mut script = self.script.lock();
            script.connect_attempts += 1;
            (script.connects.pop_front().unwrap_or(Outcome::Ok), script.connect_attempts)
        };
        match outcome {
            Outcome::Ok => Ok(ScriptedSession { session }),
            Outcome::Transient => Err(ConnectionError::transient("scripted connect timeout")),
            Outcome::Fatal => Err(ConnectionError::fatal("scripted credential rejection")),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn send(&self, _handle: &mut ScriptedSession, message: &TelemetryMessage) -> Result<Ack, DeliveryError> {
        let outcome = {
            let mut script = self.script.lock();
            script.attempts.push(message.clone());
            let outcome = script.sends.pop_front().unwrap_or(Outcome::Ok);
            if outcome == Outcome::Ok {
                script.delivered.push(message.clone());
            }
            outcome
        };
        match outcome {
            Outcome::Ok => Ok(Ack::default()),
            Outcome::Transient => Err(DeliveryError::transient("scripted throttling")),
            Outcome::Fatal => Err(DeliveryError::fatal("scripted session loss")),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn close(&self, _handle: ScriptedSession) {
        let hang = {
            let mut script = self.script.lock();
            script.closes += 1;
            script.hang_on_close
        };
        if hang {
            std::future::pending::<()>().await;
        }
    }
}
