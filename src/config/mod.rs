// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the power meter logger
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before deserialization.
//!
//! ## Configuration Structure
//!
//! The configuration is organized as a nested structure with sections:
//! - `transport`: Modbus RTU serial link settings
//! - `sampling`: scheduler cadence and boundary alignment
//! - `buffer`: flush thresholds for the sample buffer
//! - `persistence`: sinks, retry policy and backup queue
//! - `registers`: ordered register map defining the sampled fields
//!
//! ## Usage
//!
//! ```no_run
//! use rust_powermeter::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let config = Config::from_file(Path::new("config.yaml")).unwrap();
//! println!("Serial port: {}", config.transport.port);
//! ```

pub mod buffer;
pub mod persistence;
pub mod registers;
pub mod sampling;
pub mod transport;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use buffer::BufferConfig;
pub use persistence::{CsvSinkConfig, PersistenceConfig, SqliteSinkConfig};
pub use registers::{default_registers, RegisterEncoding, RegisterSpec};
pub use sampling::{SamplingConfig, SamplingMode};
pub use transport::{Parity, TransportConfig};

/// Root configuration structure for the power meter logger.
///
/// Deserialized from and serialized to YAML using serde, validated against a
/// bundled JSON schema before deserialization. Each section falls back to
/// its default when absent, so a minimal file is enough to start logging.
///
/// The loaded value is immutable for the process lifetime and is passed
/// explicitly through component constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Modbus RTU serial transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Sampling scheduler settings.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Sample buffer flush policy.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Sink, retry and backup queue settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Ordered register map defining the sampled fields.
    ///
    /// Defaults to the RX380 input register table.
    #[serde(default = "default_registers")]
    pub registers: Vec<RegisterSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            sampling: SamplingConfig::default(),
            buffer: BufferConfig::default(),
            persistence: PersistenceConfig::default(),
            registers: default_registers(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        let sample_config = Self::default();
        sample_config
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is replaced by a default one. An invalid file produces
    /// a `.sample.yaml` next to it and an error describing the problem.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        // Load and validate with the bundled schema
        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                Self::create_sample_config(path)?;
                anyhow::bail!("Configuration deserialization failed: {}", err);
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for config at {:?}",
                        parent
                    )
                })?;
            }
        }
        let contents =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write configuration file at {:?}", path))?;
        Ok(())
    }

    /// Apply command line overrides to the loaded configuration
    pub fn apply_args(&mut self, port: Option<String>, mock: Option<bool>) {
        if let Some(port) = port {
            self.transport.port = port;
        }
        if let Some(mock) = mock {
            self.transport.mock = mock;
        }
    }

    /// Semantic validation beyond what the JSON schema expresses.
    ///
    /// Checks the cross-field constraints: a usable register map, boundary
    /// periods that produce stable wall-clock marks, and a durable sink
    /// whenever sampling is enabled.
    pub fn validate(&self) -> Result<()> {
        if self.registers.is_empty() {
            anyhow::bail!("register map is empty: at least one register must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.registers {
            if !is_valid_field_name(&spec.name) {
                anyhow::bail!(
                    "invalid register name '{}': must be a lowercase identifier",
                    spec.name
                );
            }
            if !seen.insert(spec.name.as_str()) {
                anyhow::bail!("duplicate register name '{}'", spec.name);
            }
        }

        if self.sampling.interval_seconds == 0 {
            anyhow::bail!("sampling.interval_seconds must be greater than zero");
        }
        if self.sampling.degraded_interval_seconds == 0 {
            anyhow::bail!("sampling.degraded_interval_seconds must be greater than zero");
        }
        if self.sampling.boundary_minutes == 0 || 60 % self.sampling.boundary_minutes != 0 {
            anyhow::bail!(
                "sampling.boundary_minutes must divide 60, got {}",
                self.sampling.boundary_minutes
            );
        }
        if !(0.0..=1.0).contains(&self.sampling.degraded_load_threshold) {
            anyhow::bail!("sampling.degraded_load_threshold must be within 0..1");
        }

        if self.buffer.flush_max_records == 0 {
            anyhow::bail!("buffer.flush_max_records must be at least 1");
        }

        if self.persistence.retry_max_attempts == 0 {
            anyhow::bail!("persistence.retry_max_attempts must be at least 1");
        }
        if !is_valid_field_name(&self.persistence.sqlite.table) {
            anyhow::bail!(
                "invalid table name '{}': must be a lowercase identifier",
                self.persistence.sqlite.table
            );
        }
        if self.sampling.enabled && !self.persistence.sqlite.enabled {
            anyhow::bail!("sampling requires the durable sink: enable persistence.sqlite");
        }

        if self.transport.stop_bits != 1 && self.transport.stop_bits != 2 {
            anyhow::bail!("transport.stop_bits must be 1 or 2");
        }

        Ok(())
    }
}

/// Check that a name is usable as a record field and sink column name.
fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config::from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.transport.baud_rate, 19200);
        assert_eq!(config.registers.len(), default_registers().len());
    }

    #[test]
    fn test_round_trip_preserves_registers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.registers.truncate(2);
        config.save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.registers, config.registers);
    }

    #[test]
    fn test_validate_rejects_duplicate_register_names() {
        let mut config = Config::default();
        config
            .registers
            .push(RegisterSpec::scaled("voltage_l1", 4100, 0.1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_boundary_period() {
        let mut config = Config::default();
        config.sampling.boundary_minutes = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_durable_sink() {
        let mut config = Config::default();
        config.persistence.sqlite.enabled = false;
        assert!(config.validate().is_err());
        config.sampling.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_apply_args_overrides_port() {
        let mut config = Config::default();
        config.apply_args(Some("/dev/ttyACM0".to_string()), Some(true));
        assert_eq!(config.transport.port, "/dev/ttyACM0");
        assert!(config.transport.mock);
    }
}
