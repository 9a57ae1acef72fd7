// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Closed-loop furnace regulation for annealing runs
//!
//! This module provides:
//! - Hardware abstraction for the temperature source and the heater supply
//! - An incremental PID law with anti-windup and actuator saturation
//! - Stability certification over a fixed observation window
//! - A time-stepped annealing ramp with its termination rules
//! - A bounded, crash-safe process recorder
//! - The controller state machine and the daemon that schedules it

pub mod anneal;
pub mod commands;
pub mod controller;
pub mod daemon;
pub mod drivers;
pub mod initial_guess;
pub mod pid;
pub mod recorder;
pub mod shared_state;
pub mod stability;

use anyhow::Result;

use crate::config::DriverConfig;

pub use commands::{AnnealCommand, CommandError, CommandSender};
pub use controller::{ControlState, Controller};
pub use daemon::AnnealRegulatorDaemon;
pub use shared_state::{create_shared_anneal_state, AnnealStatus, SharedAnnealState};

/// Source of averaged furnace temperature readings
///
/// One call produces one reading. A failed read is reported as an error and
/// the caller treats it as "no reading" for the current tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TemperatureSource: Send {
    /// Read one averaged temperature in degrees Celsius
    async fn read_averaged_temperature(&mut self) -> Result<f64>;

    /// Release the underlying hardware handle
    async fn release(&mut self) -> Result<()>;
}

/// Voltage-controlled heater power supply
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ActuatorChannel: Send {
    /// Command the supply voltage. The value is already clamped to `[0, v_max]`.
    async fn set_voltage(&mut self, volts: f64) -> Result<()>;

    /// Release the underlying hardware handle
    async fn release(&mut self) -> Result<()>;
}

/// Create the temperature source and actuator pair for the configured driver
pub fn create_thermal_regulation_driver(
    config: &DriverConfig,
) -> Result<(Box<dyn TemperatureSource>, Box<dyn ActuatorChannel>)> {
    match config {
        DriverConfig::Simulated(simulation) => {
            let (source, actuator) = drivers::simulated::create_simulated_furnace(simulation)?;
            Ok((Box::new(source), Box::new(actuator)))
        }
    }
}
