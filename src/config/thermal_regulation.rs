// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration for the furnace regulation loop
//!
//! This module provides the configuration structures for the regulation core
//! (PID gains, actuator ceiling, stability certification), the process
//! recorder and the hardware driver selection.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Regulation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermalRegulationConfig {
    /// Scheduler tick period in milliseconds
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Upper bound for a single hardware call (read or command) in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Actuator ceiling in volts, never exceeded by any command
    #[serde(default = "default_v_max")]
    pub v_max: f64,

    /// Half width of the tracking tolerance band in degrees Celsius
    #[serde(default = "default_tolerance_celsius")]
    pub tolerance_celsius: f64,

    /// PID controller gains
    #[serde(default)]
    pub pid: PidParameters,

    /// Stability certification parameters
    #[serde(default)]
    pub stability: StabilityParameters,

    /// Temperature to voltage lookup table used for the initial voltage guess
    #[serde(default = "default_initial_voltage_table")]
    pub initial_voltage_table: Vec<VoltageTableEntry>,
}

/// PID controller gains
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PidParameters {
    /// Proportional gain (V/°C)
    pub kp: f64,
    /// Integral gain (V/(°C·s))
    pub ki: f64,
    /// Derivative gain (V·s/°C)
    pub kd: f64,
}

/// Stability certification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilityParameters {
    /// Length of the observation window in seconds
    #[serde(default = "default_observation_seconds")]
    pub observation_seconds: f64,

    /// The window is stable when its sample standard deviation is below this value (°C)
    #[serde(default = "default_stdev_threshold")]
    pub stdev_threshold: f64,
}

/// One point of the initial voltage guess table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VoltageTableEntry {
    /// Furnace temperature in degrees Celsius
    pub temperature_celsius: f64,
    /// Steady-state supply voltage holding that temperature
    pub voltage: f64,
}

/// Process recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// In-memory capacity ceiling; reaching it drops the oldest half
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Append-only CSV trace written and flushed on every recorded tick
    #[serde(default = "default_trace_file")]
    pub trace_file: PathBuf,

    /// JSON export of the retained series written at session end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_file: Option<PathBuf>,
}

/// Hardware driver selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverConfig {
    /// First-order furnace model, used for development and dry runs
    Simulated(SimulatedFurnaceConfig),
}

/// Parameters of the simulated furnace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedFurnaceConfig {
    /// Ambient (and initial) temperature in degrees Celsius
    #[serde(default = "default_ambient_celsius")]
    pub ambient_celsius: f64,

    /// Heater element resistance in ohms (power = V²/R)
    #[serde(default = "default_heater_resistance_ohms")]
    pub heater_resistance_ohms: f64,

    /// Lumped heat capacity of the furnace load in J/K
    #[serde(default = "default_heat_capacity")]
    pub heat_capacity_j_per_k: f64,

    /// Heat loss coefficient to ambient in W/K
    #[serde(default = "default_loss_coefficient")]
    pub loss_coefficient_w_per_k: f64,

    /// Peak amplitude of the uniform measurement noise in degrees Celsius
    #[serde(default = "default_noise_celsius")]
    pub noise_celsius: f64,

    /// Probability that one temperature read fails
    #[serde(default)]
    pub read_failure_probability: f64,

    /// Probability that one voltage command is lost
    #[serde(default)]
    pub command_failure_probability: f64,

    /// Simulated seconds per wall-clock second
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Random seed for reproducible noise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ThermalRegulationConfig {
    /// Scheduler tick period
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Timeout applied to each hardware call
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_tick_period_ms() -> u64 {
    500
}
fn default_io_timeout_ms() -> u64 {
    400
}
fn default_v_max() -> f64 {
    6.0
}
fn default_tolerance_celsius() -> f64 {
    1.0
}
fn default_observation_seconds() -> f64 {
    120.0
}
fn default_stdev_threshold() -> f64 {
    0.1
}
fn default_initial_voltage_table() -> Vec<VoltageTableEntry> {
    [
        (25.0, 0.0),
        (100.0, 1.73),
        (200.0, 2.65),
        (400.0, 3.87),
        (600.0, 4.8),
    ]
    .into_iter()
    .map(|(temperature_celsius, voltage)| VoltageTableEntry {
        temperature_celsius,
        voltage,
    })
    .collect()
}
fn default_capacity() -> usize {
    10_000
}
fn default_trace_file() -> PathBuf {
    PathBuf::from("anneal_trace.csv")
}
fn default_ambient_celsius() -> f64 {
    25.0
}
fn default_heater_resistance_ohms() -> f64 {
    2.0
}
fn default_heat_capacity() -> f64 {
    5.0
}
fn default_loss_coefficient() -> f64 {
    0.02
}
fn default_noise_celsius() -> f64 {
    0.02
}
fn default_time_scale() -> f64 {
    1.0
}

// Default implementations
impl Default for ThermalRegulationConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            v_max: default_v_max(),
            tolerance_celsius: default_tolerance_celsius(),
            pid: PidParameters::default(),
            stability: StabilityParameters::default(),
            initial_voltage_table: default_initial_voltage_table(),
        }
    }
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: 0.01,
            ki: 0.0,
            kd: 0.125,
        }
    }
}

impl Default for StabilityParameters {
    fn default() -> Self {
        Self {
            observation_seconds: default_observation_seconds(),
            stdev_threshold: default_stdev_threshold(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            trace_file: default_trace_file(),
            export_file: None,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::Simulated(SimulatedFurnaceConfig::default())
    }
}

impl Default for SimulatedFurnaceConfig {
    fn default() -> Self {
        Self {
            ambient_celsius: default_ambient_celsius(),
            heater_resistance_ohms: default_heater_resistance_ohms(),
            heat_capacity_j_per_k: default_heat_capacity(),
            loss_coefficient_w_per_k: default_loss_coefficient(),
            noise_celsius: default_noise_celsius(),
            read_failure_probability: 0.0,
            command_failure_probability: 0.0,
            time_scale: default_time_scale(),
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_uses_defaults() {
        let yaml = "v_max: 4.5\npid:\n  kp: 0.02\n  ki: 0.001\n  kd: 0.1\n";
        let config: ThermalRegulationConfig = serde_yml::from_str(yaml).unwrap();

        assert_eq!(config.v_max, 4.5);
        assert_eq!(config.pid.kp, 0.02);
        assert_eq!(config.tick_period_ms, 500);
        assert_eq!(config.stability.observation_seconds, 120.0);
        assert_eq!(config.initial_voltage_table.len(), 5);
    }

    #[test]
    fn test_driver_tagged_representation() {
        let yaml = "type: simulated\nambient_celsius: 20.0\nseed: 7\n";
        let driver: DriverConfig = serde_yml::from_str(yaml).unwrap();

        let DriverConfig::Simulated(sim) = driver;
        assert_eq!(sim.ambient_celsius, 20.0);
        assert_eq!(sim.seed, Some(7));
        assert_eq!(sim.heater_resistance_ohms, 2.0);
    }

    #[test]
    fn test_durations() {
        let config = ThermalRegulationConfig::default();
        assert_eq!(config.tick_period(), Duration::from_millis(500));
        assert_eq!(config.io_timeout(), Duration::from_millis(400));
    }
}
