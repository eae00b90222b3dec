//! End-to-end runs of the orchestrator against scripted channels

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rideau_sim::streaming::{Outcome, ScriptedChannel};
use rideau_sim::{Location, Orchestrator, PublisherState, RunSummary, SimulatorConfig};
use tokio::time::sleep;

fn channels(entries: &[(&str, ScriptedChannel)]) -> HashMap<String, ScriptedChannel> {
    entries.iter().map(|(id, c)| (id.to_string(), c.clone())).collect()
}

async fn run(
    config: SimulatorConfig,
    channels: &HashMap<String, ScriptedChannel>,
    stop_after: Option<Duration>,
) -> RunSummary {
    let locations: Vec<Location> = config
        .locations
        .iter()
        .filter(|l| channels.contains_key(&l.id))
        .cloned()
        .collect();
    let orchestrator = Orchestrator::new(Arc::new(config));
    let stop = async move {
        match stop_after {
            Some(after) => sleep(after).await,
            None => std::future::pending().await,
        }
    };
    orchestrator
        .run(&locations, |l: &Location| channels[&l.id].clone(), stop)
        .await
}

fn state_of(summary: &RunSummary, id: &str) -> PublisherState {
    summary.reports.iter().find(|r| r.location == id).map(|r| r.state).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fatal_location_does_not_hold_up_others() {
    let nac = ScriptedChannel::new().with_connects([Outcome::Fatal]);
    let dows = ScriptedChannel::new();
    let fifth = ScriptedChannel::new().with_connects([Outcome::Transient]);
    let map = channels(&[("nac", nac.clone()), ("dows-lake", dows.clone()), ("fifth-avenue", fifth.clone())]);

    let summary = run(SimulatorConfig::default(), &map, Some(Duration::from_secs(25))).await;

    assert!(summary.interrupted);
    assert!(summary.forced.is_empty());
    assert_eq!(summary.reports.len(), 3);
    assert_eq!(state_of(&summary, "nac"), PublisherState::Failed);
    assert_eq!(state_of(&summary, "dows-lake"), PublisherState::Closed);
    assert_eq!(state_of(&summary, "fifth-avenue"), PublisherState::Closed);

    // ticks at 0, 10, 20
    assert_eq!(dows.delivered().len(), 3);
    // connected at t=1 after one backoff, then ticks at 1, 10, 20
    assert_eq!(fifth.delivered().len(), 3);
    assert!(nac.attempts().is_empty());
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_everyone_and_stops_sending() {
    let dows = ScriptedChannel::new();
    let nac = ScriptedChannel::new().with_sends([Outcome::Transient, Outcome::Transient]);
    let map = channels(&[("dows-lake", dows.clone()), ("nac", nac.clone())]);

    let summary = run(SimulatorConfig::default(), &map, Some(Duration::from_secs(12))).await;

    assert!(summary.is_clean());
    for report in &summary.reports {
        assert_eq!(report.state, PublisherState::Closed);
    }
    assert_eq!(dows.closes(), 1);
    assert_eq!(nac.closes(), 1);

    let before = (dows.attempts().len(), nac.attempts().len());
    sleep(Duration::from_secs(60)).await;
    assert_eq!((dows.attempts().len(), nac.attempts().len()), before);
}

#[tokio::test(start_paused = true)]
async fn test_hung_close_is_forced_after_shutdown_timeout() {
    let mut config = SimulatorConfig::default();
    config.shutdown_timeout = Duration::from_secs(2);
    let stuck = ScriptedChannel::new().hanging_close();
    let fine = ScriptedChannel::new();
    let map = channels(&[("nac", stuck.clone()), ("dows-lake", fine.clone())]);

    let summary = run(config, &map, Some(Duration::from_secs(5))).await;

    assert_eq!(summary.forced, vec!["nac".to_string()]);
    assert_eq!(state_of(&summary, "dows-lake"), PublisherState::Closed);
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(stuck.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_ends_when_every_publisher_failed() {
    let map = channels(&[
        ("nac", ScriptedChannel::new().with_connects([Outcome::Fatal])),
        ("dows-lake", ScriptedChannel::new().with_connects([Outcome::Fatal])),
    ]);

    // no stop trigger at all
    let summary = run(SimulatorConfig::default(), &map, None).await;

    assert!(!summary.interrupted);
    assert!(summary.all_failed());
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.failed().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_handle_stops_the_run() {
    let dows = ScriptedChannel::new();
    let map = channels(&[("dows-lake", dows.clone())]);
    let config = SimulatorConfig::default();
    let locations: Vec<Location> = config.select(Some("dows-lake")).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(config));
    let handle = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        sleep(Duration::from_secs(15)).await;
        handle.cancel();
    });
    let summary = orchestrator
        .run(&locations, |l: &Location| map[&l.id].clone(), std::future::pending())
        .await;

    assert!(summary.interrupted);
    assert_eq!(state_of(&summary, "dows-lake"), PublisherState::Closed);
    assert_eq!(dows.delivered().len(), 2);
}
