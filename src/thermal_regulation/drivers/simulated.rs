// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated furnace driver
//!
//! This module provides a driver pair that emulates a resistively heated
//! furnace so the regulator can run without hardware. The simulation includes:
//! - Joule heating of the element, `P = V² / R`
//! - Linear heat loss to the ambient, `h · (T - T_ambient)`
//! - A lumped heat capacity `C` giving a first-order response with time
//!   constant `C / h`
//! - Uniform measurement noise on each averaged reading
//! - Optional random read and command failures for fault-path testing
//!
//! The temperature source and the actuator share one simulation behind an
//! `Arc<Mutex<..>>`. The model is advanced by the real elapsed time (scaled by
//! `time_scale`) every time either half is touched.

use anyhow::{anyhow, bail, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SimulatedFurnaceConfig;
use crate::thermal_regulation::{ActuatorChannel, TemperatureSource};

/// Largest single integration step accepted, in simulated seconds
const MAX_STEP_SECONDS: f64 = 3600.0;

/// Lumped thermal model of the furnace
#[derive(Debug, Clone, PartialEq)]
pub struct FurnaceSimulation {
    /// Current furnace temperature in Celsius
    temperature: f64,
    /// Voltage currently applied to the heating element
    voltage: f64,
    /// Ambient temperature in Celsius
    ambient_temperature: f64,
    /// Heating element resistance (Ω)
    resistance_ohms: f64,
    /// Lumped heat capacity (J/K)
    heat_capacity: f64,
    /// Loss coefficient to ambient (W/K)
    loss_coefficient: f64,
}

impl FurnaceSimulation {
    /// Create a furnace at ambient temperature with the heater off
    pub fn new(config: &SimulatedFurnaceConfig) -> Self {
        Self {
            temperature: config.ambient_celsius,
            voltage: 0.0,
            ambient_temperature: config.ambient_celsius,
            resistance_ohms: config.heater_resistance_ohms,
            heat_capacity: config.heat_capacity_j_per_k,
            loss_coefficient: config.loss_coefficient_w_per_k,
        }
    }

    /// Heater power at the applied voltage (W)
    pub fn heater_power(&self) -> f64 {
        self.voltage * self.voltage / self.resistance_ohms
    }

    /// Temperature the furnace settles at for a constant `volts`
    ///
    /// Infinite when the furnace has no losses and the heater is on.
    pub fn steady_state_temperature(&self, volts: f64) -> f64 {
        let power = volts * volts / self.resistance_ohms;
        if self.loss_coefficient > 0.0 {
            self.ambient_temperature + power / self.loss_coefficient
        } else if power > 0.0 {
            f64::INFINITY
        } else {
            self.temperature
        }
    }

    /// Advance the model by `dt` seconds with the currently applied voltage
    ///
    /// Uses the exact solution of the first-order equation over the step, so
    /// large steps stay stable.
    pub fn advance(&mut self, dt: f64) {
        if !(dt > 0.0) {
            return;
        }
        let dt = dt.min(MAX_STEP_SECONDS);
        if self.loss_coefficient > 0.0 {
            let settled = self.steady_state_temperature(self.voltage);
            let decay = (-self.loss_coefficient * dt / self.heat_capacity).exp();
            self.temperature = settled + (self.temperature - settled) * decay;
        } else {
            self.temperature += self.heater_power() * dt / self.heat_capacity;
        }
    }

    pub fn set_voltage(&mut self, volts: f64) {
        self.voltage = volts.max(0.0);
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }
}

/// Simulation state shared by the source and actuator halves
#[derive(Debug)]
struct SimulatedFurnace {
    model: FurnaceSimulation,
    rng: StdRng,
    time_scale: f64,
    noise_celsius: f64,
    read_failure_probability: f64,
    command_failure_probability: f64,
    last_update: Instant,
    last_log_time: Instant,
    released: bool,
}

impl SimulatedFurnace {
    fn new(config: &SimulatedFurnaceConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let now = Instant::now();
        Self {
            model: FurnaceSimulation::new(config),
            rng,
            time_scale: config.time_scale,
            noise_celsius: config.noise_celsius,
            read_failure_probability: config.read_failure_probability,
            command_failure_probability: config.command_failure_probability,
            last_update: now,
            last_log_time: now,
            released: false,
        }
    }

    /// Bring the model up to the current wall-clock time
    fn catch_up(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.model.advance(elapsed * self.time_scale);

        if self.last_log_time.elapsed() >= Duration::from_secs(60) {
            info!(
                "Furnace simulation status: {:.2}°C, heater {:.3} V ({:.2} W)",
                self.model.temperature(),
                self.model.voltage(),
                self.model.heater_power()
            );
            self.last_log_time = now;
        }
    }

    fn read(&mut self) -> Result<f64> {
        if self.released {
            bail!("Simulated furnace has been released");
        }
        self.catch_up();
        if self.read_failure_probability > 0.0 && self.rng.random_bool(self.read_failure_probability)
        {
            bail!("Simulated temperature read failure");
        }
        let noise = if self.noise_celsius > 0.0 {
            self.rng.random_range(-self.noise_celsius..=self.noise_celsius)
        } else {
            0.0
        };
        Ok(self.model.temperature() + noise)
    }

    fn command(&mut self, volts: f64) -> Result<()> {
        if self.released {
            bail!("Simulated furnace has been released");
        }
        self.catch_up();
        if self.command_failure_probability > 0.0
            && self.rng.random_bool(self.command_failure_probability)
        {
            bail!("Simulated supply rejected the {:.4} V command", volts);
        }
        let old = self.model.voltage();
        self.model.set_voltage(volts);
        debug!("Simulated supply: {:.4} V -> {:.4} V", old, volts);
        Ok(())
    }
}

fn lock(furnace: &Mutex<SimulatedFurnace>) -> Result<std::sync::MutexGuard<'_, SimulatedFurnace>> {
    furnace
        .lock()
        .map_err(|_| anyhow!("Failed to lock furnace simulation"))
}

/// Temperature source half of the simulated furnace
pub struct SimulatedTemperatureSource {
    furnace: Arc<Mutex<SimulatedFurnace>>,
}

/// Heater supply half of the simulated furnace
pub struct SimulatedActuator {
    furnace: Arc<Mutex<SimulatedFurnace>>,
}

/// Create a connected source/actuator pair sharing one simulation
pub fn create_simulated_furnace(
    config: &SimulatedFurnaceConfig,
) -> Result<(SimulatedTemperatureSource, SimulatedActuator)> {
    if !(config.heater_resistance_ohms > 0.0 && config.heat_capacity_j_per_k > 0.0) {
        bail!(
            "Simulated furnace needs a positive resistance and heat capacity (got {} Ω, {} J/K)",
            config.heater_resistance_ohms,
            config.heat_capacity_j_per_k
        );
    }
    info!(
        "Starting simulated furnace: ambient {:.1}°C, R = {} Ω, C = {} J/K, h = {} W/K, time scale x{}",
        config.ambient_celsius,
        config.heater_resistance_ohms,
        config.heat_capacity_j_per_k,
        config.loss_coefficient_w_per_k,
        config.time_scale
    );
    let furnace = Arc::new(Mutex::new(SimulatedFurnace::new(config)));
    Ok((
        SimulatedTemperatureSource {
            furnace: Arc::clone(&furnace),
        },
        SimulatedActuator { furnace },
    ))
}

#[async_trait::async_trait]
impl TemperatureSource for SimulatedTemperatureSource {
    async fn read_averaged_temperature(&mut self) -> Result<f64> {
        lock(&self.furnace)?.read()
    }

    async fn release(&mut self) -> Result<()> {
        lock(&self.furnace)?.released = true;
        debug!("Simulated temperature source released");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActuatorChannel for SimulatedActuator {
    async fn set_voltage(&mut self, volts: f64) -> Result<()> {
        lock(&self.furnace)?.command(volts)
    }

    async fn release(&mut self) -> Result<()> {
        let mut furnace = lock(&self.furnace)?;
        furnace.model.set_voltage(0.0);
        furnace.released = true;
        debug!("Simulated supply released");
        Ok(())
    }
}
