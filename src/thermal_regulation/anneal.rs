// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Annealing ramp plan and its evaluator
//!
//! Once the furnace is certified stable, an annealing run steps the supply
//! voltage by a fixed signed amount every step period until a terminal
//! temperature or voltage is crossed. Voltages are kept rounded to
//! [`VOLTAGE_DECIMALS`] places so that repeated steps never accumulate
//! floating-point residue that would let the voltage slip past the end value
//! without ever comparing below (or above) it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::commands::CommandError;

/// Temperature overshoot past the end value that completes a temperature ramp (°C)
pub const TEMPERATURE_END_TOLERANCE: f64 = 0.1;

/// Decimal places kept on commanded ramp voltages
pub const VOLTAGE_DECIMALS: i32 = 4;

/// Round a voltage to [`VOLTAGE_DECIMALS`] places
pub fn round_voltage(volts: f64) -> f64 {
    let scale = 10f64.powi(VOLTAGE_DECIMALS);
    (volts * scale).round() / scale
}

/// Terminal condition of an annealing ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnealMode {
    /// Stop once the furnace temperature crosses the end value
    Temperature,
    /// Stop once the commanded voltage crosses the end value
    Voltage,
}

impl fmt::Display for AnnealMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnealMode::Temperature => write!(f, "temperature"),
            AnnealMode::Voltage => write!(f, "voltage"),
        }
    }
}

impl FromStr for AnnealMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" | "temp" | "t" => Ok(AnnealMode::Temperature),
            "voltage" | "volt" | "v" => Ok(AnnealMode::Voltage),
            other => Err(CommandError::UnknownMode(other.to_string())),
        }
    }
}

/// A fully specified annealing ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealPlan {
    /// Terminal condition
    pub mode: AnnealMode,
    /// End temperature (°C) or end voltage (V) depending on `mode`
    pub end_value: f64,
    /// Signed voltage increment applied every step; the sign is the ramp direction
    pub step_size: f64,
    /// Time between two steps
    pub step_period: Duration,
}

/// What the evaluator wants the controller to do this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnnealDecision {
    /// Terminal condition reached: zero the actuator and go idle
    Complete,
    /// Command this (rounded, clamped) voltage and restart the step timer
    Step(f64),
    /// Nothing to do yet
    Hold,
}

impl AnnealPlan {
    /// Build a plan from operator input, rejecting any incomplete field.
    pub fn new(
        mode: AnnealMode,
        end_value: f64,
        step_size: f64,
        step_period_minutes: f64,
        v_max: f64,
    ) -> Result<Self, CommandError> {
        if !end_value.is_finite() {
            return Err(CommandError::InvalidField {
                field: "end_value",
                value: end_value,
            });
        }
        if mode == AnnealMode::Voltage && !(0.0..=v_max).contains(&end_value) {
            return Err(CommandError::EndVoltageOutOfRange { end_value, v_max });
        }
        if !step_size.is_finite() || step_size == 0.0 {
            return Err(CommandError::InvalidField {
                field: "step_size",
                value: step_size,
            });
        }
        if !(step_period_minutes.is_finite() && step_period_minutes > 0.0) {
            return Err(CommandError::InvalidField {
                field: "step_period_minutes",
                value: step_period_minutes,
            });
        }
        let step_period = Duration::try_from_secs_f64(step_period_minutes * 60.0).map_err(
            |_| CommandError::InvalidField {
                field: "step_period_minutes",
                value: step_period_minutes,
            },
        )?;

        Ok(Self {
            mode,
            end_value,
            step_size,
            step_period,
        })
    }

    /// Terminal condition check, evaluated before any step.
    pub fn is_complete(&self, temperature: f64, voltage: f64) -> bool {
        let descending = self.step_size < 0.0;
        match self.mode {
            AnnealMode::Temperature => {
                if descending {
                    temperature < self.end_value - TEMPERATURE_END_TOLERANCE
                } else {
                    temperature > self.end_value + TEMPERATURE_END_TOLERANCE
                }
            }
            AnnealMode::Voltage => {
                let voltage = round_voltage(voltage);
                let end = round_voltage(self.end_value);
                if descending {
                    voltage < end
                } else {
                    voltage > end
                }
            }
        }
    }

    /// Decide the action for this tick.
    ///
    /// The termination check always runs first, so a tick that completes the
    /// ramp never also moves the voltage by `step_size`.
    pub fn evaluate(
        &self,
        temperature: f64,
        voltage: f64,
        since_last_step: Duration,
        v_max: f64,
    ) -> AnnealDecision {
        let voltage = round_voltage(voltage);
        if self.is_complete(temperature, voltage) {
            return AnnealDecision::Complete;
        }
        if since_last_step >= self.step_period {
            let requested = round_voltage(voltage + self.step_size);
            let next = requested.clamp(0.0, v_max);
            // A voltage ramp pinned at 0 or V_max has nowhere left to go
            if self.mode == AnnealMode::Voltage && next != requested {
                return AnnealDecision::Complete;
            }
            return AnnealDecision::Step(next);
        }
        AnnealDecision::Hold
    }
}

impl fmt::Display for AnnealPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.mode {
            AnnealMode::Temperature => "°C",
            AnnealMode::Voltage => "V",
        };
        write!(
            f,
            "{:+.4} V every {:.2} min until {} {} {}",
            self.step_size,
            self.step_period.as_secs_f64() / 60.0,
            self.mode,
            self.end_value,
            unit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V_MAX: f64 = 6.0;

    fn voltage_plan(end: f64, step: f64) -> AnnealPlan {
        AnnealPlan::new(AnnealMode::Voltage, end, step, 1.0, V_MAX).unwrap()
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_voltage(1.00049), 1.0005);
        assert_eq!(round_voltage(0.1 + 0.2), 0.3);
    }

    #[test]
    fn test_descending_voltage_ramp_runs_until_below_end() {
        let plan = voltage_plan(1.0, -0.005);
        let period = plan.step_period;

        assert_eq!(
            plan.evaluate(300.0, 1.003, period, V_MAX),
            AnnealDecision::Step(0.998)
        );
        assert_eq!(
            plan.evaluate(300.0, 0.998, period, V_MAX),
            AnnealDecision::Complete
        );
    }

    #[test]
    fn test_end_value_itself_does_not_complete() {
        let plan = voltage_plan(1.0, -0.005);
        assert!(!plan.is_complete(300.0, 1.0));
        assert!(plan.is_complete(300.0, 0.9999));
    }

    #[test]
    fn test_termination_precedes_step() {
        let plan = voltage_plan(2.0, 0.01);
        // Due for a step, but already past the end value
        assert_eq!(
            plan.evaluate(300.0, 2.01, Duration::from_secs(3600), V_MAX),
            AnnealDecision::Complete
        );
    }

    #[test]
    fn test_hold_before_period_elapses() {
        let plan = voltage_plan(1.0, -0.005);
        assert_eq!(
            plan.evaluate(300.0, 2.0, Duration::from_secs(59), V_MAX),
            AnnealDecision::Hold
        );
    }

    #[test]
    fn test_accumulated_steps_reach_end_exactly() {
        let plan = voltage_plan(1.0, -0.001);
        let mut voltage = 1.01;
        let mut steps = 0;
        loop {
            match plan.evaluate(300.0, voltage, plan.step_period, V_MAX) {
                AnnealDecision::Step(v) => {
                    voltage = v;
                    steps += 1;
                }
                AnnealDecision::Complete => break,
                AnnealDecision::Hold => unreachable!(),
            }
            assert!(steps < 100, "ramp never terminated");
        }
        // 1.010 -> 1.000 is ten steps, one more to go below the end value
        assert_eq!(steps, 11);
        assert_eq!(voltage, 0.999);
    }

    #[test]
    fn test_temperature_mode_uses_tolerance() {
        let cooling = AnnealPlan::new(AnnealMode::Temperature, 400.0, -0.01, 0.5, V_MAX).unwrap();
        assert!(!cooling.is_complete(399.95, 3.0));
        assert!(cooling.is_complete(399.89, 3.0));

        let heating = AnnealPlan::new(AnnealMode::Temperature, 400.0, 0.01, 0.5, V_MAX).unwrap();
        assert!(!heating.is_complete(400.05, 3.0));
        assert!(heating.is_complete(400.11, 3.0));
    }

    #[test]
    fn test_step_is_clamped_to_ceiling() {
        let plan = AnnealPlan::new(AnnealMode::Temperature, 900.0, 0.5, 0.1, V_MAX).unwrap();
        assert_eq!(
            plan.evaluate(500.0, 5.8, plan.step_period, V_MAX),
            AnnealDecision::Step(V_MAX)
        );
    }

    #[test]
    fn test_voltage_ramp_down_to_zero_completes() {
        let plan = voltage_plan(0.0, -0.5);
        let period = plan.step_period;
        assert_eq!(plan.evaluate(300.0, 0.5, period, V_MAX), AnnealDecision::Step(0.0));
        // Sitting on the end value is not past it
        assert!(!plan.is_complete(300.0, 0.0));
        assert_eq!(
            plan.evaluate(300.0, 0.0, period / 2, V_MAX),
            AnnealDecision::Hold
        );
        assert_eq!(plan.evaluate(300.0, 0.0, period, V_MAX), AnnealDecision::Complete);
    }

    #[test]
    fn test_voltage_ramp_up_to_ceiling_completes() {
        let plan = voltage_plan(V_MAX, 0.5);
        let period = plan.step_period;
        assert_eq!(plan.evaluate(300.0, 5.5, period, V_MAX), AnnealDecision::Step(V_MAX));
        assert_eq!(plan.evaluate(300.0, V_MAX, period, V_MAX), AnnealDecision::Complete);
    }

    #[test]
    fn test_voltage_step_past_limit_completes_without_stepping() {
        let plan = voltage_plan(1.0, -2.0);
        assert_eq!(
            plan.evaluate(300.0, 1.5, plan.step_period, V_MAX),
            AnnealDecision::Complete
        );
    }

    #[test]
    fn test_rejects_incomplete_plans() {
        assert!(AnnealPlan::new(AnnealMode::Voltage, f64::NAN, -0.01, 1.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Voltage, 1.0, 0.0, 1.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Voltage, 1.0, -0.01, 0.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Voltage, 1.0, -0.01, -2.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Voltage, 7.0, -0.01, 1.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Temperature, 300.0, f64::INFINITY, 1.0, V_MAX).is_err());
        assert!(AnnealPlan::new(AnnealMode::Temperature, 300.0, 0.1, 1e300, V_MAX).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Voltage".parse::<AnnealMode>().unwrap(), AnnealMode::Voltage);
        assert_eq!("temp".parse::<AnnealMode>().unwrap(), AnnealMode::Temperature);
        assert!("pressure".parse::<AnnealMode>().is_err());
    }
}
