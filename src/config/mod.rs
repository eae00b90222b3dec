// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Configuration module
//!
//! The TOML file is parsed into a loose [`ConfigEnvelope`] where everything is
//! optional, then resolved against the built-in defaults and validated into an
//! immutable [`SimulatorConfig`]. Publishers only ever see the resolved form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::sensors::Quantity;

/// Seconds between ticks when the file does not say otherwise
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;

/// Reference deployment: (id, display name)
const DEFAULT_LOCATIONS: [(&str, &str); 3] = [
    ("dows-lake", "Dow's Lake"),
    ("fifth-avenue", "Fifth Avenue"),
    ("nac", "NAC"),
];

/// Inclusive range and per-tick step limit for one quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantityBounds {
    pub min: f64,
    pub max: f64,
    /// Largest absolute change allowed between consecutive readings
    pub variation: f64,
}

impl QuantityBounds {
    pub const fn new(min: f64, max: f64, variation: f64) -> Self {
        Self { min, max, variation }
    }

    /// Reference winter conditions on the canal
    pub fn reference(quantity: Quantity) -> Self {
        match quantity {
            Quantity::IceThickness => Self::new(20.0, 40.0, 2.0),
            Quantity::SurfaceTemperature => Self::new(-10.0, 0.0, 1.0),
            Quantity::SnowAccumulation => Self::new(0.0, 15.0, 1.0),
            Quantity::ExternalTemperature => Self::new(-15.0, 5.0, 2.0),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self, location: &str, quantity: Quantity) -> Result<(), ConfigError> {
        let name = quantity.field_name();
        for (field, value) in [("min", self.min), ("max", self.max), ("variation", self.variation)] {
            if !value.is_finite() {
                return Err(ConfigError::field(location, format!("{name}.{field}"), "must be a finite number"));
            }
        }
        if self.min >= self.max {
            return Err(ConfigError::field(
                location,
                format!("{name}.min"),
                format!("must be below max ({} >= {})", self.min, self.max),
            ));
        }
        if self.variation < 0.0 {
            return Err(ConfigError::field(
                location,
                format!("{name}.variation"),
                format!("must not be negative (got {})", self.variation),
            ));
        }
        // the model samples over max - min and over +/- variation
        if !(self.max - self.min).is_finite() {
            return Err(ConfigError::field(location, format!("{name}.max"), "is too far from min to sample between"));
        }
        if !(2.0 * self.variation).is_finite() {
            return Err(ConfigError::field(location, format!("{name}.variation"), "is too large to sample"));
        }
        Ok(())
    }
}

/// Bounds for every quantity a device reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub ice_thickness: QuantityBounds,
    pub surface_temperature: QuantityBounds,
    pub snow_accumulation: QuantityBounds,
    pub external_temperature: QuantityBounds,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ice_thickness: QuantityBounds::reference(Quantity::IceThickness),
            surface_temperature: QuantityBounds::reference(Quantity::SurfaceTemperature),
            snow_accumulation: QuantityBounds::reference(Quantity::SnowAccumulation),
            external_temperature: QuantityBounds::reference(Quantity::ExternalTemperature),
        }
    }
}

impl DeviceConfig {
    pub fn bounds(&self, quantity: Quantity) -> &QuantityBounds {
        match quantity {
            Quantity::IceThickness => &self.ice_thickness,
            Quantity::SurfaceTemperature => &self.surface_temperature,
            Quantity::SnowAccumulation => &self.snow_accumulation,
            Quantity::ExternalTemperature => &self.external_temperature,
        }
    }

    fn bounds_mut(&mut self, quantity: Quantity) -> &mut QuantityBounds {
        match quantity {
            Quantity::IceThickness => &mut self.ice_thickness,
            Quantity::SurfaceTemperature => &mut self.surface_temperature,
            Quantity::SnowAccumulation => &mut self.snow_accumulation,
            Quantity::ExternalTemperature => &mut self.external_temperature,
        }
    }

    pub fn validate(&self, location: &str) -> Result<(), ConfigError> {
        for quantity in Quantity::ALL {
            self.bounds(quantity).validate(location, quantity)?;
        }
        Ok(())
    }
}

/// A sensor site
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Stable device id, also used as the hub device id
    pub id: String,
    /// Display name sent in every message
    pub name: String,
    /// Environment variable holding the device connection string
    pub credential_env: String,
    pub device: DeviceConfig,
}

impl Location {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            credential_env: default_credential_env(id),
            device: DeviceConfig::default(),
        }
    }
}

/// `dows-lake` -> `DOWS_LAKE_CONNECTION_STRING`
pub fn default_credential_env(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{stem}_CONNECTION_STRING")
}

/// Retry and backoff policy for connects and sends
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per message, including the first
    pub max_send_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of each delay that may be shaved off at random (0 disables)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Resolved, validated simulator configuration.
///
/// Built once at startup and shared read-only (behind an `Arc`) by every publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub send_interval: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryConfig,
    pub locations: Vec<Location>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(DEFAULT_SEND_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            retry: RetryConfig::default(),
            locations: DEFAULT_LOCATIONS
                .iter()
                .map(|(id, name)| Location::new(id, name))
                .collect(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to the built-in defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let envelope: ConfigEnvelope = toml::from_str(content)?;
        Self::from_envelope(envelope)
    }

    /// Resolve an envelope against the defaults and validate the result
    pub fn from_envelope(envelope: ConfigEnvelope) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = envelope.send_interval_secs {
            config.send_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = envelope.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = envelope.send_timeout_secs {
            config.send_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = envelope.shutdown_timeout_secs {
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        let retry = envelope.retry;
        if let Some(attempts) = retry.max_send_attempts {
            config.retry.max_send_attempts = attempts;
        }
        if let Some(ms) = retry.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = retry.multiplier {
            config.retry.multiplier = multiplier;
        }
        if let Some(ms) = retry.max_delay_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = retry.jitter {
            config.retry.jitter = jitter;
        }

        for (id, entry) in envelope.locations {
            let index = match config.locations.iter().position(|l| l.id == id) {
                Some(index) => index,
                None => {
                    debug!("Adding location '{}' from configuration", id);
                    config.locations.push(Location::new(&id, &id));
                    config.locations.len() - 1
                }
            };
            entry.apply(&mut config.locations[index])?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("send_interval_secs", self.send_interval),
            ("connect_timeout_secs", self.connect_timeout),
            ("send_timeout_secs", self.send_timeout),
            ("shutdown_timeout_secs", self.shutdown_timeout),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::InvalidSetting { field, reason: "must be greater than zero".into() });
            }
        }

        let retry = &self.retry;
        if retry.max_send_attempts == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "retry.max_send_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(ConfigError::InvalidSetting {
                field: "retry.multiplier",
                reason: format!("must be >= 1 (got {})", retry.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidSetting {
                field: "retry.jitter",
                reason: format!("must be within [0, 1] (got {})", retry.jitter),
            });
        }
        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::InvalidSetting {
                field: "retry.base_delay_ms",
                reason: "must not exceed retry.max_delay_ms".into(),
            });
        }

        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }
        for location in &self.locations {
            if location.name.trim().is_empty() {
                return Err(ConfigError::field(&location.id, "name", "must not be empty"));
            }
            location.device.validate(&location.id)?;
        }
        Ok(())
    }

    pub fn location(&self, id: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// All locations, or exactly the one named by `id`
    pub fn select(&self, id: Option<&str>) -> Result<Vec<Location>, ConfigError> {
        match id {
            None => Ok(self.locations.clone()),
            Some(id) => self
                .location(id)
                .cloned()
                .map(|l| vec![l])
                .ok_or_else(|| ConfigError::UnknownLocation {
                    requested: id.to_string(),
                    available: self.location_ids().join(", "),
                }),
        }
    }

    pub fn location_ids(&self) -> Vec<&str> {
        self.locations.iter().map(|l| l.id.as_str()).collect()
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("rideau-sim"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Configuration file as written by operators; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigEnvelope {
    pub send_interval_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetryEnvelope,
    #[serde(default)]
    pub locations: BTreeMap<String, LocationEnvelope>,
}

/// `[retry]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryEnvelope {
    pub max_send_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<f64>,
}

/// `[locations.<id>]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationEnvelope {
    pub name: Option<String>,
    pub credential_env: Option<String>,
    pub ice_thickness: Option<BoundsEnvelope>,
    pub surface_temperature: Option<BoundsEnvelope>,
    pub snow_accumulation: Option<BoundsEnvelope>,
    pub external_temperature: Option<BoundsEnvelope>,
}

impl LocationEnvelope {
    fn bounds(&self, quantity: Quantity) -> Option<&BoundsEnvelope> {
        match quantity {
            Quantity::IceThickness => self.ice_thickness.as_ref(),
            Quantity::SurfaceTemperature => self.surface_temperature.as_ref(),
            Quantity::SnowAccumulation => self.snow_accumulation.as_ref(),
            Quantity::ExternalTemperature => self.external_temperature.as_ref(),
        }
    }

    fn apply(&self, location: &mut Location) -> Result<(), ConfigError> {
        if let Some(name) = &self.name {
            location.name = name.clone();
        }
        if let Some(env) = &self.credential_env {
            location.credential_env = env.clone();
        }
        for quantity in Quantity::ALL {
            if let Some(entry) = self.bounds(quantity) {
                *location.device.bounds_mut(quantity) = entry.resolve(&location.id, quantity)?;
            }
        }
        Ok(())
    }
}

/// A quantity table; when present all three keys are required
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundsEnvelope {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub variation: Option<f64>,
}

impl BoundsEnvelope {
    fn resolve(&self, location: &str, quantity: Quantity) -> Result<QuantityBounds, ConfigError> {
        let require = |value: Option<f64>, field: &str| {
            value.ok_or_else(|| {
                ConfigError::field(location, format!("{}.{}", quantity.field_name(), field), "is required")
            })
        };
        Ok(QuantityBounds {
            min: require(self.min, "min")?,
            max: require(self.max, "max")?,
            variation: require(self.variation, "variation")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_reference_deployment() {
        let config = SimulatorConfig::default();
        assert_eq!(config.location_ids(), vec!["dows-lake", "fifth-avenue", "nac"]);
        assert_eq!(config.send_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());

        let nac = config.location("nac").unwrap();
        assert_eq!(nac.name, "NAC");
        assert_eq!(nac.credential_env, "NAC_CONNECTION_STRING");
        assert_eq!(nac.device.ice_thickness, QuantityBounds::new(20.0, 40.0, 2.0));
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = SimulatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimulatorConfig::default());
    }

    #[test]
    fn test_overrides_merge_with_defaults() {
        let config = SimulatorConfig::from_toml_str(
            r#"
            send_interval_secs = 5

            [retry]
            max_send_attempts = 3
            jitter = 0.0

            [locations.dows-lake]
            ice_thickness = { min = 10, max = 30, variation = 1.5 }

            [locations.hogs-back]
            name = "Hog's Back"
            "#,
        )
        .unwrap();

        assert_eq!(config.send_interval, Duration::from_secs(5));
        assert_eq!(config.retry.max_send_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));

        let dows = config.location("dows-lake").unwrap();
        assert_eq!(dows.name, "Dow's Lake");
        assert_eq!(dows.device.ice_thickness, QuantityBounds::new(10.0, 30.0, 1.5));
        assert_eq!(dows.device.snow_accumulation, QuantityBounds::reference(Quantity::SnowAccumulation));

        let extra = config.location("hogs-back").unwrap();
        assert_eq!(extra.name, "Hog's Back");
        assert_eq!(extra.credential_env, "HOGS_BACK_CONNECTION_STRING");
        assert_eq!(config.locations.len(), 4);
    }

    #[test]
    fn test_inverted_bounds_name_location_and_field() {
        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.nac]
            surface_temperature = { min = 0, max = -10, variation = 1 }
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::InvalidField { location, field, .. } => {
                assert_eq!(location, "nac");
                assert_eq!(field, "surface_temperature.min");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_equal_bounds_rejected() {
        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.fifth-avenue]
            snow_accumulation = { min = 5, max = 5, variation = 1 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("fifth-avenue"));
        assert!(err.to_string().contains("snow_accumulation.min"));
    }

    #[test]
    fn test_negative_variation_rejected() {
        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.dows-lake]
            external_temperature = { min = -15, max = 5, variation = -2 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("external_temperature.variation"));
    }

    #[test]
    fn test_unsampleable_ranges_rejected() {
        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.nac]
            ice_thickness = { min = -1e308, max = 1e308, variation = 2 }
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "location 'nac': ice_thickness.max is too far from min to sample between");

        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.dows-lake]
            snow_accumulation = { min = 0, max = 15, variation = 1e308 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("snow_accumulation.variation"));
    }

    #[test]
    fn test_missing_bound_field_rejected() {
        let err = SimulatorConfig::from_toml_str(
            r#"
            [locations.dows-lake]
            ice_thickness = { min = 20, max = 40 }
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "location 'dows-lake': ice_thickness.variation is required");
    }

    #[test]
    fn test_global_settings_validated() {
        let err = SimulatorConfig::from_toml_str("send_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { field: "send_interval_secs", .. }));

        let err = SimulatorConfig::from_toml_str("[retry]\nmax_send_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { field: "retry.max_send_attempts", .. }));

        let err = SimulatorConfig::from_toml_str("[retry]\njitter = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { field: "retry.jitter", .. }));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = SimulatorConfig::from_toml_str("send_intervall_secs = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_select_single_location() {
        let config = SimulatorConfig::default();

        let all = config.select(None).unwrap();
        assert_eq!(all.len(), 3);

        let one = config.select(Some("fifth-avenue")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "Fifth Avenue");

        let err = config.select(Some("rideau-hall")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown location 'rideau-hall' (available: dows-lake, fifth-avenue, nac)"
        );
    }

    #[test]
    fn test_credential_env_derivation() {
        assert_eq!(default_credential_env("dows-lake"), "DOWS_LAKE_CONNECTION_STRING");
        assert_eq!(default_credential_env("nac"), "NAC_CONNECTION_STRING");
    }
}
