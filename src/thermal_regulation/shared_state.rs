// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared state for the regulation session
//!
//! This module provides the thread-safe status projection read by the display
//! surface and the heartbeat: the latest status line and title, a short
//! history of recent samples, and the lifecycle of the regulation task.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::controller::ControlState;
use super::pid::PidComponents;
use super::recorder::Sample;

/// Number of recent samples kept for live display (one minute at 2 Hz)
pub const MAX_RECENT_SAMPLES: usize = 120;

/// Status projection produced at the end of every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnealStatus {
    /// Current controller state
    pub state: ControlState,
    /// Short window title
    pub title: String,
    /// Human-readable status line
    pub message: String,
    /// Last valid temperature reading
    pub temperature_celsius: Option<f64>,
    /// Active target
    pub target_celsius: Option<f64>,
    /// Commanded supply voltage
    pub voltage: f64,
    /// Minutes since the session started
    pub elapsed_minutes: f64,
    /// Active or last annealing plan, formatted
    pub plan: Option<String>,
    /// Whether an annealing run can be offered to the operator
    pub anneal_available: bool,
    /// Last tick had no valid reading
    pub degraded: bool,
    /// PID breakdown of the last regulated tick
    pub pid_components: Option<PidComponents>,
    /// Samples held in memory by the recorder
    pub samples_retained: usize,
    /// Samples discarded by recorder compaction
    pub samples_dropped: usize,
    /// Ticks executed so far
    pub tick_count: u64,
}

impl Default for AnnealStatus {
    fn default() -> Self {
        Self {
            state: ControlState::WaitingForInitialTarget,
            title: "Anneal regulator".to_string(),
            message: "Starting".to_string(),
            temperature_celsius: None,
            target_celsius: None,
            voltage: 0.0,
            elapsed_minutes: 0.0,
            plan: None,
            anneal_available: false,
            degraded: false,
            pid_components: None,
            samples_retained: 0,
            samples_dropped: 0,
            tick_count: 0,
        }
    }
}

/// Lifecycle of the regulation task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Task created, first tick not yet run
    Starting,
    /// Ticking normally
    Running,
    /// Orderly stop after an exit request
    Stopped,
    /// Session aborted by a fatal error
    Error { message: String },
}

/// Shared regulation state across the whole process
#[derive(Debug)]
pub struct SharedAnnealRegulationState {
    status: AnnealStatus,
    recent: VecDeque<Sample>,
    phase: SessionPhase,
}

impl SharedAnnealRegulationState {
    pub fn new() -> Self {
        Self {
            status: AnnealStatus::default(),
            recent: VecDeque::with_capacity(MAX_RECENT_SAMPLES),
            phase: SessionPhase::Starting,
        }
    }

    /// Publish the projection of the last tick
    pub fn update_status(&mut self, status: AnnealStatus) {
        self.status = status;
        if self.phase == SessionPhase::Starting {
            self.phase = SessionPhase::Running;
        }
    }

    /// Add a recorded sample to the display history
    pub fn push_sample(&mut self, sample: Sample) {
        self.recent.push_back(sample);
        if self.recent.len() > MAX_RECENT_SAMPLES {
            self.recent.pop_front();
        }
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub fn get_status(&self) -> &AnnealStatus {
        &self.status
    }

    pub fn get_phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Last `count` samples in time order
    pub fn get_recent_samples(&self, count: usize) -> Vec<Sample> {
        let start = self.recent.len().saturating_sub(count);
        self.recent.range(start..).copied().collect()
    }
}

impl Default for SharedAnnealRegulationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Type alias for the shared regulation state wrapped in Arc<RwLock<>>
pub type SharedAnnealState = Arc<RwLock<SharedAnnealRegulationState>>;

/// Create a new shared regulation state instance
pub fn create_shared_anneal_state() -> SharedAnnealState {
    Arc::new(RwLock::new(SharedAnnealRegulationState::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Sample {
        Sample {
            elapsed_minutes: i as f64,
            temperature_celsius: 100.0,
            voltage: 1.0,
            target_celsius: 100.0,
        }
    }

    #[test]
    fn test_initial_state() {
        let state = SharedAnnealRegulationState::new();
        assert_eq!(state.get_phase(), &SessionPhase::Starting);
        assert_eq!(
            state.get_status().state,
            ControlState::WaitingForInitialTarget
        );
        assert!(state.get_recent_samples(10).is_empty());
    }

    #[test]
    fn test_first_status_marks_running() {
        let mut state = SharedAnnealRegulationState::new();
        state.update_status(AnnealStatus {
            tick_count: 1,
            ..Default::default()
        });
        assert_eq!(state.get_phase(), &SessionPhase::Running);
        assert_eq!(state.get_status().tick_count, 1);

        state.set_phase(SessionPhase::Stopped);
        state.update_status(AnnealStatus::default());
        assert_eq!(state.get_phase(), &SessionPhase::Stopped);
    }

    #[test]
    fn test_recent_history_is_bounded() {
        let mut state = SharedAnnealRegulationState::new();
        for i in 0..(MAX_RECENT_SAMPLES + 30) {
            state.push_sample(sample(i));
        }
        let all = state.get_recent_samples(usize::MAX);
        assert_eq!(all.len(), MAX_RECENT_SAMPLES);
        assert_eq!(all[0], sample(30));

        let last_three = state.get_recent_samples(3);
        assert_eq!(
            last_three,
            vec![
                sample(MAX_RECENT_SAMPLES + 27),
                sample(MAX_RECENT_SAMPLES + 28),
                sample(MAX_RECENT_SAMPLES + 29)
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_handle() {
        let shared = create_shared_anneal_state();
        shared.write().await.push_sample(sample(0));
        assert_eq!(shared.read().await.get_recent_samples(5).len(), 1);
    }
}
