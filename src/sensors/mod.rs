//! Sensor module - measured quantities and the reading model

mod reading;
mod simulator;

pub use reading::{Quantity, ReadingState, TelemetryMessage};
pub use simulator::{draw_delta, quantize, round_one_decimal, ReadingModel};
