// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Annealer library
//!
//! This library provides closed-loop furnace regulation for materials
//! annealing: it seeks a temperature setpoint with a PID law, certifies that
//! the furnace has settled, then runs a programmed, time-stepped ramp of the
//! heater supply until a terminal temperature or voltage is reached. The
//! process trace is recorded with bounded memory and a crash-safe log.

pub mod config;
pub mod daemon;
pub mod thermal_regulation;
