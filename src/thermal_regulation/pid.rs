// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PID regulation law
//!
//! The regulator works in incremental form: it returns a voltage *delta* to be
//! added to the currently commanded voltage, together with the trial integral
//! accumulator. It holds no state, so committing the integral (anti-windup)
//! stays with the caller, which knows whether the actuator saturated.

use serde::{Deserialize, Serialize};

use crate::config::PidParameters;

/// PID controller components for analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidComponents {
    /// Proportional term value
    pub proportional: f64,
    /// Integral term value
    pub integral: f64,
    /// Derivative term value
    pub derivative: f64,
    /// Error value (setpoint - process_variable)
    pub error: f64,
}

/// Result of one regulator evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidOutput {
    /// Voltage change requested by the regulator
    pub delta: f64,
    /// `integral + error * dt`, to be committed only if the actuator is not saturated
    pub trial_integral: f64,
    /// Individual PID components
    pub components: PidComponents,
}

/// Evaluate the PID law.
///
/// # Arguments
/// * `error` - Setpoint minus current temperature (°C)
/// * `current_temp` - Current temperature (°C)
/// * `last_temp` - Previous temperature, `None` on the first sample
/// * `integral` - Committed integral accumulator (°C·s)
/// * `dt` - Actual elapsed time since `last_temp` was observed, in seconds
/// * `gains` - Kp, Ki, Kd
///
/// The derivative acts on the measurement, not on the error: a rising
/// temperature opposes a further voltage increase.
///
/// # Examples
///
/// ```
/// use rust_annealer::config::PidParameters;
/// use rust_annealer::thermal_regulation::pid::regulate;
///
/// let gains = PidParameters { kp: 0.01, ki: 0.0, kd: 0.125 };
/// let out = regulate(10.0, 40.0, Some(40.0), 0.0, 0.5, &gains);
/// assert!((out.delta - 0.1).abs() < 1e-12);
/// ```
pub fn regulate(
    error: f64,
    current_temp: f64,
    last_temp: Option<f64>,
    integral: f64,
    dt: f64,
    gains: &PidParameters,
) -> PidOutput {
    let last_temp = last_temp.unwrap_or(current_temp);

    let proportional = gains.kp * error;

    let trial_integral = integral + error * dt;
    let integral_term = gains.ki * trial_integral;

    let derivative = if dt > 0.0 {
        -gains.kd * (current_temp - last_temp) / dt
    } else {
        0.0
    };

    PidOutput {
        delta: proportional + integral_term + derivative,
        trial_integral,
        components: PidComponents {
            proportional,
            integral: integral_term,
            derivative,
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidParameters {
        PidParameters { kp, ki, kd }
    }

    #[test]
    fn test_reference_scenario() {
        let out = regulate(10.0, 40.0, Some(40.0), 0.0, 0.5, &gains(0.01, 0.0, 0.125));
        assert_relative_eq!(out.delta, 0.1, epsilon = 1e-12);
        assert_relative_eq!(out.components.derivative, 0.0);
        assert_relative_eq!(out.trial_integral, 5.0);
    }

    #[test]
    fn test_first_sample_has_no_derivative_kick() {
        let out = regulate(5.0, 20.0, None, 0.0, 0.5, &gains(0.0, 0.0, 10.0));
        assert_eq!(out.delta, 0.0);
    }

    #[test]
    fn test_rising_temperature_opposes_voltage_increase() {
        let out = regulate(0.0, 41.0, Some(40.0), 0.0, 0.5, &gains(0.0, 0.0, 0.125));
        assert_relative_eq!(out.components.derivative, -0.25, epsilon = 1e-12);
        assert!(out.delta < 0.0);
    }

    #[test]
    fn test_integral_term_uses_trial_integral() {
        let out = regulate(2.0, 48.0, Some(48.0), 3.0, 0.5, &gains(0.0, 0.1, 0.0));
        assert_relative_eq!(out.trial_integral, 4.0);
        assert_relative_eq!(out.components.integral, 0.4, epsilon = 1e-12);
        assert_relative_eq!(out.delta, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_integral_scales_with_actual_interval() {
        let g = gains(0.0, 1.0, 0.0);
        let short = regulate(1.0, 0.0, None, 0.0, 0.5, &g);
        let long = regulate(1.0, 0.0, None, 0.0, 0.75, &g);
        assert_relative_eq!(short.trial_integral, 0.5);
        assert_relative_eq!(long.trial_integral, 0.75);
    }

    #[test]
    fn test_zero_interval_is_safe() {
        let out = regulate(1.0, 30.0, Some(20.0), 0.0, 0.0, &gains(1.0, 1.0, 1.0));
        assert!(out.delta.is_finite());
        assert_eq!(out.components.derivative, 0.0);
    }
}
