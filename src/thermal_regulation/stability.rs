// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Stability detection over an observation window

use ndarray::ArrayView1;

/// Minimum number of samples before a window can be judged
pub const MIN_SAMPLES: usize = 10;

/// Returns `true` when the window is settled.
///
/// A window with fewer than [`MIN_SAMPLES`] samples is never stable. Otherwise
/// the window is stable iff its sample standard deviation is strictly below
/// `stdev_threshold`.
pub fn is_stable(samples: &[f64], stdev_threshold: f64) -> bool {
    if samples.len() < MIN_SAMPLES {
        return false;
    }
    let stdev = ArrayView1::from(samples).std(1.0);
    stdev.is_finite() && stdev < stdev_threshold
}
