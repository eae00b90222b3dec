//! Core runtime - publishers, their retry policy and the orchestrator

mod backoff;
mod orchestrator;
mod publisher;

pub use backoff::Backoff;
pub use orchestrator::{Orchestrator, RunSummary};
pub use publisher::{DevicePublisher, PublisherReport, PublisherState};
