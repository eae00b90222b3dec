// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Rideau Canal ice sensor simulator
//!
//! Simulates one IoT sensor per canal location and streams readings to Azure IoT Hub:
//! - Bounded random-walk readings for ice, surface, snow and air
//! - One independent publisher task per location
//! - Bounded send retries with exponential backoff, reconnect on session loss
//! - Coordinated, time-bounded shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Orchestrator                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐              │
//! │  │ DevicePublisher  │  │ DevicePublisher  │   ...        │
//! │  │  ReadingModel    │  │  ReadingModel    │              │
//! │  └────────┬─────────┘  └────────┬─────────┘              │
//! │           ↓                     ↓                        │
//! │  ┌──────────────────────────────────────────────────┐    │
//! │  │  DeliveryChannel (IoT Hub MQTT / console)         │    │
//! │  └──────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod core;
pub mod error;
pub mod security;
pub mod sensors;
pub mod streaming;

// Re-exports for convenience
pub use config::{DeviceConfig, Location, SimulatorConfig};
pub use core::{DevicePublisher, Orchestrator, PublisherReport, PublisherState, RunSummary};
pub use error::{ConfigError, ConnectionError, DeliveryError, FailureKind};
pub use sensors::{ReadingModel, ReadingState, TelemetryMessage};
pub use streaming::{ConsoleChannel, DeliveryChannel, IotHubChannel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Display name
pub const NAME: &str = "Rideau Canal Sensor Simulator";
