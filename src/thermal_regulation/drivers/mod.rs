// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Furnace drivers
//!
//! - Simulated: first-order furnace model for development and testing

pub mod simulated;

pub use simulated::{
    create_simulated_furnace, FurnaceSimulation, SimulatedActuator, SimulatedTemperatureSource,
};
