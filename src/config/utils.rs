// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, DriverConfig, CONFIG_SCHEMA};

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_annealer --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Actuator ceiling**: `v_max` must be finite and strictly positive
/// - **Timing**: tick period and I/O timeout must be non-zero
/// - **Tracking band and stability**: tolerance, threshold and observation
///   duration must be finite and strictly positive
/// - **Recorder**: capacity must allow halving (at least 2)
/// - **Initial voltage table**: non-empty, finite, strictly increasing temperatures
/// - **Simulation**: physical parameters must be positive, probabilities in [0, 1]
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");
    let regulation = &config.thermal_regulation;

    if !(regulation.v_max.is_finite() && regulation.v_max > 0.0) {
        anyhow::bail!("Invalid actuator ceiling: {} V", regulation.v_max);
    }
    if regulation.tick_period_ms == 0 {
        anyhow::bail!("Tick period must be greater than zero");
    }
    if regulation.io_timeout_ms == 0 {
        anyhow::bail!("Hardware call timeout must be greater than zero");
    }
    if regulation.io_timeout_ms >= regulation.tick_period_ms {
        // Allowed, a slow call only delays the next tick
        warn!(
            "Hardware timeout ({} ms) is not shorter than the tick period ({} ms)",
            regulation.io_timeout_ms, regulation.tick_period_ms
        );
    }

    let positive = [
        ("tolerance_celsius", regulation.tolerance_celsius),
        ("stability.stdev_threshold", regulation.stability.stdev_threshold),
        (
            "stability.observation_seconds",
            regulation.stability.observation_seconds,
        ),
    ];
    for (name, value) in positive {
        if !(value.is_finite() && value > 0.0) {
            anyhow::bail!("{} must be a positive number, got {}", name, value);
        }
    }

    let gains = [
        ("pid.kp", regulation.pid.kp),
        ("pid.ki", regulation.pid.ki),
        ("pid.kd", regulation.pid.kd),
    ];
    for (name, value) in gains {
        if !value.is_finite() {
            anyhow::bail!("{} must be finite, got {}", name, value);
        }
    }

    if config.recorder.capacity < 2 {
        anyhow::bail!(
            "Recorder capacity must be at least 2, got {}",
            config.recorder.capacity
        );
    }

    let table = &regulation.initial_voltage_table;
    if table.is_empty() {
        anyhow::bail!("initial_voltage_table must contain at least one entry");
    }
    for entry in table {
        if !(entry.temperature_celsius.is_finite() && entry.voltage.is_finite()) {
            anyhow::bail!("initial_voltage_table contains a non-finite entry");
        }
    }
    for pair in table.windows(2) {
        if pair[1].temperature_celsius <= pair[0].temperature_celsius {
            anyhow::bail!(
                "initial_voltage_table temperatures must be strictly increasing ({} then {})",
                pair[0].temperature_celsius,
                pair[1].temperature_celsius
            );
        }
    }

    match &config.driver {
        DriverConfig::Simulated(sim) => {
            let physical = [
                ("heater_resistance_ohms", sim.heater_resistance_ohms),
                ("heat_capacity_j_per_k", sim.heat_capacity_j_per_k),
                ("time_scale", sim.time_scale),
            ];
            for (name, value) in physical {
                if !(value.is_finite() && value > 0.0) {
                    anyhow::bail!("driver.{} must be a positive number, got {}", name, value);
                }
            }
            if !(sim.loss_coefficient_w_per_k.is_finite() && sim.loss_coefficient_w_per_k >= 0.0)
            {
                anyhow::bail!("driver.loss_coefficient_w_per_k must not be negative");
            }
            let probabilities = [
                ("read_failure_probability", sim.read_failure_probability),
                ("command_failure_probability", sim.command_failure_probability),
            ];
            for (name, value) in probabilities {
                if !(0.0..=1.0).contains(&value) {
                    anyhow::bail!("driver.{} must be within [0, 1], got {}", name, value);
                }
            }
        }
    }

    Ok(())
}
