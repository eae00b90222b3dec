// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Runs one publisher task per location and coordinates shutdown

use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{DevicePublisher, PublisherReport, PublisherState};
use crate::config::{Location, SimulatorConfig};
use crate::streaming::DeliveryChannel;

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Reports in completion order
    pub reports: Vec<PublisherReport>,
    /// Locations whose task had to be aborted or never reported back
    pub forced: Vec<String>,
    /// True when the stop trigger fired, false when every publisher ended on its own
    pub interrupted: bool,
}

impl RunSummary {
    pub fn all_failed(&self) -> bool {
        self.forced.is_empty()
            && !self.reports.is_empty()
            && self.reports.iter().all(|r| r.state == PublisherState::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PublisherReport> {
        self.reports.iter().filter(|r| r.state == PublisherState::Failed)
    }

    pub fn total_sent(&self) -> u64 {
        self.reports.iter().map(|r| r.sent).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.forced.is_empty() && !self.all_failed()
    }

    /// 0 on a clean stop, 1 when nothing ever got through, 2 on a forced stop
    pub fn exit_code(&self) -> u8 {
        if !self.forced.is_empty() {
            2
        } else if self.all_failed() {
            1
        } else {
            0
        }
    }
}

pub struct Orchestrator {
    config: Arc<SimulatorConfig>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: Arc<SimulatorConfig>) -> Self {
        Self { config, shutdown: CancellationToken::new() }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Cancelling this token stops the run as if `stop` had resolved
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a publisher per location and run until `stop` resolves or every
    /// publisher has ended by itself.
    pub async fn run<C, F, S>(&self, locations: &[Location], mut make_channel: F, stop: S) -> RunSummary
    where
        C: DeliveryChannel,
        F: FnMut(&Location) -> C,
        S: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();
        let mut summary = RunSummary::default();

        for location in locations {
            let channel = make_channel(location);
            let publisher = DevicePublisher::new(location.clone(), self.config.clone(), channel);
            pending.insert(location.id.clone());
            tasks.spawn(publisher.run(self.shutdown.child_token()));
        }
        info!("Started {} sensor publisher(s)", tasks.len());

        tokio::pin!(stop);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    info!("Stop requested, shutting down publishers");
                    summary.interrupted = true;
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(result) => collect(result, &mut pending, &mut summary),
                    None => {
                        warn!("Every publisher has stopped on its own");
                        break;
                    }
                },
            }
        }

        self.shutdown.cancel();
        let drained = timeout(self.config.shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                collect(result, &mut pending, &mut summary);
            }
        })
        .await;

        if drained.is_err() {
            tasks.abort_all();
            error!(
                "Shutdown timed out after {:?}; aborting {} publisher(s)",
                self.config.shutdown_timeout,
                pending.len()
            );
            // reap aborted tasks so nothing outlives the run
            while tasks.join_next().await.is_some() {}
        }

        summary.forced = pending.into_iter().collect();
        for id in &summary.forced {
            error!(location = %id, "Publisher did not stop cleanly");
        }
        summary
    }
}

fn collect(
    result: Result<PublisherReport, JoinError>,
    pending: &mut BTreeSet<String>,
    summary: &mut RunSummary,
) {
    match result {
        Ok(report) => {
            pending.remove(&report.location);
            summary.reports.push(report);
        }
        Err(e) if e.is_panic() => error!("Publisher task panicked: {}", e),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(location: &str, state: PublisherState) -> PublisherReport {
        PublisherReport {
            location: location.to_string(),
            state,
            sent: 0,
            retries: 0,
            dropped: 0,
            reconnects: 0,
            last_error: None,
            last_reading: crate::sensors::ReadingState {
                ice_thickness: 30.0,
                surface_temperature: -5.0,
                snow_accumulation: 5.0,
                external_temperature: -10.0,
            },
        }
    }

    #[test]
    fn test_exit_codes() {
        let clean = RunSummary {
            reports: vec![report("nac", PublisherState::Closed), report("dows-lake", PublisherState::Failed)],
            forced: vec![],
            interrupted: true,
        };
        assert!(clean.is_clean());
        assert_eq!(clean.exit_code(), 0);
        assert_eq!(clean.failed().count(), 1);

        let dead = RunSummary {
            reports: vec![report("nac", PublisherState::Failed)],
            forced: vec![],
            interrupted: false,
        };
        assert!(dead.all_failed());
        assert_eq!(dead.exit_code(), 1);

        let forced = RunSummary {
            reports: vec![report("nac", PublisherState::Closed)],
            forced: vec!["dows-lake".to_string()],
            interrupted: true,
        };
        assert!(!forced.is_clean());
        assert_eq!(forced.exit_code(), 2);
    }
}
