// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Measured quantities, per-device reading state and the outbound message

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::Location;

/// Quantities reported by every ice sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    IceThickness,        // cm
    SurfaceTemperature,  // °C
    SnowAccumulation,    // cm
    ExternalTemperature, // °C
}

impl Quantity {
    /// All quantities in wire order
    pub const ALL: [Quantity; 4] = [
        Quantity::IceThickness,
        Quantity::SurfaceTemperature,
        Quantity::SnowAccumulation,
        Quantity::ExternalTemperature,
    ];

    /// Key used in the configuration file
    pub fn field_name(&self) -> &'static str {
        match self {
            Quantity::IceThickness => "ice_thickness",
            Quantity::SurfaceTemperature => "surface_temperature",
            Quantity::SnowAccumulation => "snow_accumulation",
            Quantity::ExternalTemperature => "external_temperature",
        }
    }

    /// Key used in the telemetry payload
    pub fn wire_name(&self) -> &'static str {
        match self {
            Quantity::IceThickness => "iceThickness",
            Quantity::SurfaceTemperature => "surfaceTemperature",
            Quantity::SnowAccumulation => "snowAccumulation",
            Quantity::ExternalTemperature => "externalTemperature",
        }
    }

    /// Short name used in console lines
    pub fn label(&self) -> &'static str {
        match self {
            Quantity::IceThickness => "Ice",
            Quantity::SurfaceTemperature => "Surface",
            Quantity::SnowAccumulation => "Snow",
            Quantity::ExternalTemperature => "External",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::IceThickness | Quantity::SnowAccumulation => "cm",
            Quantity::SurfaceTemperature | Quantity::ExternalTemperature => "°C",
        }
    }
}

/// Last emitted value of each quantity for one device.
///
/// Owned by a single publisher and only replaced once a send is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingState {
    pub ice_thickness: f64,
    pub surface_temperature: f64,
    pub snow_accumulation: f64,
    pub external_temperature: f64,
}

impl ReadingState {
    pub fn get(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::IceThickness => self.ice_thickness,
            Quantity::SurfaceTemperature => self.surface_temperature,
            Quantity::SnowAccumulation => self.snow_accumulation,
            Quantity::ExternalTemperature => self.external_temperature,
        }
    }

    pub fn set(&mut self, quantity: Quantity, value: f64) {
        match quantity {
            Quantity::IceThickness => self.ice_thickness = value,
            Quantity::SurfaceTemperature => self.surface_temperature = value,
            Quantity::SnowAccumulation => self.snow_accumulation = value,
            Quantity::ExternalTemperature => self.external_temperature = value,
        }
    }
}

/// One telemetry payload as sent to the hub.
///
/// Field order matches the hub's documented schema, though receivers must not
/// rely on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub device_id: String,
    pub location: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub ice_thickness: f64,
    pub surface_temperature: f64,
    pub snow_accumulation: f64,
    pub external_temperature: f64,
}

impl TelemetryMessage {
    /// Build the payload for `reading`, truncating `at` to whole seconds.
    pub fn new(location: &Location, reading: &ReadingState, at: DateTime<Utc>) -> Self {
        Self {
            device_id: location.id.clone(),
            location: location.name.clone(),
            timestamp: at.trunc_subsecs(0),
            ice_thickness: reading.ice_thickness,
            surface_temperature: reading.surface_temperature,
            snow_accumulation: reading.snow_accumulation,
            external_temperature: reading.external_temperature,
        }
    }

    /// The measurements carried by this message
    pub fn reading(&self) -> ReadingState {
        ReadingState {
            ice_thickness: self.ice_thickness,
            surface_temperature: self.surface_temperature,
            snow_accumulation: self.snow_accumulation,
            external_temperature: self.external_temperature,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Human-readable one-liner for console logs
    pub fn summary(&self) -> String {
        let reading = self.reading();
        let values: Vec<String> = Quantity::ALL
            .iter()
            .map(|q| format!("{}={}{}", q.label(), reading.get(*q), q.unit()))
            .collect();
        format!("{}: {}", self.location, values.join(", "))
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%SZ"))
}
