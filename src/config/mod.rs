// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the annealing regulator
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before it is deserialized.
//!
//! ## Configuration Structure
//!
//! - `thermal_regulation`: PID gains, actuator ceiling, tolerance band,
//!   stability certification and the initial voltage table
//! - `recorder`: capacity ceiling and trace/export file locations
//! - `driver`: hardware driver selection and its parameters
//!
//! ## Usage
//!
//! ```no_run
//! use rust_annealer::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("run_42.csv".into()),  // Trace file
//!     None,                       // Export file
//!     Some(250),                  // Tick period (ms)
//! );
//!
//! println!("Actuator ceiling: {} V", config.thermal_regulation.v_max);
//! ```

pub mod thermal_regulation;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use thermal_regulation::{
    DriverConfig, PidParameters, RecorderConfig, SimulatedFurnaceConfig, StabilityParameters,
    ThermalRegulationConfig, VoltageTableEntry,
};
pub use utils::{output_config_schema, validate_specific_rules};

/// Embedded JSON schema used to validate configuration files
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure for the annealing regulator.
///
/// Every section falls back to its defaults when absent from the file, so a
/// minimal configuration only needs the values that differ.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Regulation loop settings, fixed for the lifetime of a session.
    #[serde(default)]
    pub thermal_regulation: ThermalRegulationConfig,

    /// Process recorder settings.
    #[serde(default)]
    pub recorder: RecorderConfig,

    /// Hardware driver selection.
    #[serde(default)]
    pub driver: DriverConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
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

        // YAML is converted to a generic JSON value for schema validation
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `trace_file` - Path of the append-only CSV trace
    /// * `export_file` - Path of the JSON export written at session end
    /// * `tick_period_ms` - Scheduler tick period in milliseconds
    pub fn apply_args(
        &mut self,
        trace_file: Option<PathBuf>,
        export_file: Option<PathBuf>,
        tick_period_ms: Option<u64>,
    ) {
        if let Some(trace_file) = trace_file {
            debug!("Overriding trace file from command line: {:?}", trace_file);
            self.recorder.trace_file = trace_file;
        }

        if let Some(export_file) = export_file {
            debug!("Overriding export file from command line: {:?}", export_file);
            self.recorder.export_file = Some(export_file);
        }

        if let Some(tick_period_ms) = tick_period_ms {
            debug!(
                "Overriding tick period from command line: {} ms",
                tick_period_ms
            );
            self.thermal_regulation.tick_period_ms = tick_period_ms;
        }
    }
}
