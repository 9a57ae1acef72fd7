// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Initial voltage guess for a fresh setpoint
//!
//! When a session starts seeking a new target from rest, the supply is first
//! commanded to the steady-state voltage expected for that temperature so the
//! PID only has to correct the residual. The expectation comes from a
//! calibration table of (temperature, voltage) points: piecewise-linear between
//! points, linear extrapolation from the end segments outside the table.

use crate::config::VoltageTableEntry;

/// Interpolate the steady-state voltage for `target_celsius`, clamped to `[0, v_max]`.
///
/// The table must be sorted by strictly increasing temperature (enforced at
/// configuration load). An empty table yields 0 V, a single point yields its
/// voltage.
pub fn initial_voltage(table: &[VoltageTableEntry], target_celsius: f64, v_max: f64) -> f64 {
    let raw = match table {
        [] => 0.0,
        [only] => only.voltage,
        _ => {
            // Segment containing the target, or the nearest end segment
            let upper = table
                .iter()
                .position(|entry| entry.temperature_celsius >= target_celsius)
                .unwrap_or(table.len() - 1)
                .max(1);
            let low = &table[upper - 1];
            let high = &table[upper];
            let slope = (high.voltage - low.voltage)
                / (high.temperature_celsius - low.temperature_celsius);
            low.voltage + slope * (target_celsius - low.temperature_celsius)
        }
    };

    if raw.is_finite() {
        raw.clamp(0.0, v_max)
    } else {
        0.0
    }
}
