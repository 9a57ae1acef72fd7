// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Regulation daemon
//!
//! This module runs the controller in its own tokio task on a fixed-cadence
//! interval. Ticks never overlap: a tick that overruns its period delays the
//! next one instead of triggering a burst. Every exit path (operator exit,
//! running flag cleared, fatal tick error, driver panic) goes through the controller's
//! shutdown so the heater is zeroed, the trace flushed and the drivers released.

use anyhow::{anyhow, Result};
use futures::FutureExt;
use log::{debug, error, info};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::thermal_regulation::commands::CommandSender;
use crate::thermal_regulation::controller::{ControlState, Controller, TickOutcome};
use crate::thermal_regulation::recorder::ProcessRecorder;
use crate::thermal_regulation::shared_state::{SessionPhase, SharedAnnealState};
use crate::thermal_regulation::{
    create_thermal_regulation_driver, ActuatorChannel, TemperatureSource,
};

/// How often the session logs a progress line
const PROGRESS_LOG_PERIOD: Duration = Duration::from_secs(60);

/// End-of-session summary
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Controller state when the session stopped
    pub final_state: ControlState,
    /// Number of ticks executed
    pub ticks: u64,
    /// Session duration in minutes
    pub elapsed_minutes: f64,
    /// Samples still held in memory
    pub samples_retained: usize,
    /// Samples discarded by recorder compaction
    pub samples_dropped: usize,
    /// CSV trace log location
    pub trace_file: PathBuf,
    /// JSON export location, when one was written
    pub export_file: Option<PathBuf>,
    /// Fatal error that ended the session, if any
    pub aborted: Option<String>,
}

/// Regulation session running in its own task
pub struct AnnealRegulatorDaemon {
    /// Full configuration, fixed for the session
    config: Config,
    /// Shared state for the display surface
    shared_state: SharedAnnealState,
    /// Running flag shared across the system
    running: Arc<AtomicBool>,
    /// Task handle for the session
    task_handle: Option<JoinHandle<Result<SessionSummary>>>,
    /// Command sender to the controller
    command_sender: Option<CommandSender>,
}

impl AnnealRegulatorDaemon {
    pub fn new(config: Config, shared_state: SharedAnnealState, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            shared_state,
            running,
            task_handle: None,
            command_sender: None,
        }
    }

    /// Create the configured drivers and start the session
    pub fn start(&mut self) -> Result<CommandSender> {
        let (source, actuator) = create_thermal_regulation_driver(&self.config.driver)?;
        self.start_with_drivers(source, actuator)
    }

    /// Start the session on explicit driver handles
    pub fn start_with_drivers(
        &mut self,
        source: Box<dyn TemperatureSource>,
        actuator: Box<dyn ActuatorChannel>,
    ) -> Result<CommandSender> {
        if self.task_handle.is_some() {
            return Err(anyhow!("Regulation session already started"));
        }

        let recorder_config = &self.config.recorder;
        let recorder =
            ProcessRecorder::with_trace_log(recorder_config.capacity, &recorder_config.trace_file)?;
        let controller = Controller::new(
            self.config.thermal_regulation.clone(),
            source,
            actuator,
            recorder,
        );
        let sender = controller.handle();

        let tick_period = self.config.thermal_regulation.tick_period();
        info!(
            "Starting regulation session: tick {:?}, ceiling {} V, trace {:?}",
            tick_period,
            self.config.thermal_regulation.v_max,
            recorder_config.trace_file
        );

        let session = RegulationSession {
            controller,
            tick_period,
            shared_state: self.shared_state.clone(),
            running: self.running.clone(),
            trace_file: recorder_config.trace_file.clone(),
            export_file: recorder_config.export_file.clone(),
        };
        self.task_handle = Some(tokio::spawn(session.run()));
        self.command_sender = Some(sender.clone());
        Ok(sender)
    }

    pub fn command_sender(&self) -> Option<CommandSender> {
        self.command_sender.clone()
    }

    /// Whether the session task has ended
    pub fn is_finished(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Ask the session to exit and wait for its summary
    pub async fn stop(&mut self) -> Result<SessionSummary> {
        if let Some(sender) = &self.command_sender {
            // The task may already be gone; joining reports the outcome
            if let Err(e) = sender.request_exit() {
                debug!("Exit request not delivered: {}", e);
            }
        }
        self.join().await
    }

    /// Wait for the session to end
    pub async fn join(&mut self) -> Result<SessionSummary> {
        let handle = self
            .task_handle
            .take()
            .ok_or_else(|| anyhow!("Regulation session not started"))?;
        handle.await?
    }
}

/// Everything the session task owns
struct RegulationSession {
    controller: Controller,
    tick_period: Duration,
    shared_state: SharedAnnealState,
    running: Arc<AtomicBool>,
    trace_file: PathBuf,
    export_file: Option<PathBuf>,
}

impl RegulationSession {
    async fn run(mut self) -> Result<SessionSummary> {
        info!("Regulation task started");
        let started = Instant::now();
        let mut interval = time::interval(self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress_log = started;
        let mut aborted = None;

        loop {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                info!("Running flag cleared, stopping regulation");
                break;
            }

            let tick = AssertUnwindSafe(self.controller.tick(started.elapsed()))
                .catch_unwind()
                .await;
            let tick = match tick {
                Ok(result) => result,
                Err(payload) => {
                    let message =
                        format!("Regulation tick panicked: {}", panic_message(&*payload));
                    error!("{}, aborting session", message);
                    aborted = Some(message);
                    break;
                }
            };

            match tick {
                Ok(TickOutcome::Continue(report)) => {
                    if let Some((from, to)) = report.transition {
                        debug!("Tick transition {:?} -> {:?}", from, to);
                    }
                    if last_progress_log.elapsed() >= PROGRESS_LOG_PERIOD {
                        info!("{}", report.status.message);
                        last_progress_log = Instant::now();
                    }
                    let mut state = self.shared_state.write().await;
                    if let Some(sample) = report.sample {
                        state.push_sample(sample);
                    }
                    state.update_status(report.status);
                }
                Ok(TickOutcome::Exit) => break,
                Err(e) => {
                    error!("Regulation tick failed, aborting session: {:#}", e);
                    aborted = Some(format!("{:#}", e));
                    break;
                }
            }
        }

        let shutdown = self.controller.shutdown().await;
        if let Err(e) = &shutdown {
            error!("Error during regulation shutdown: {:#}", e);
        }

        let mut export_file = None;
        if let Some(path) = &self.export_file {
            match self.controller.recorder().export_json(path) {
                Ok(()) => export_file = Some(path.clone()),
                Err(e) => error!("Failed to export trace: {:#}", e),
            }
        }

        let status = self.controller.status();
        {
            let mut state = self.shared_state.write().await;
            state.update_status(status.clone());
            state.set_phase(match &aborted {
                Some(message) => SessionPhase::Error {
                    message: message.clone(),
                },
                None => SessionPhase::Stopped,
            });
        }
        // The rest of the process follows the session
        self.running.store(false, Ordering::SeqCst);

        let summary = SessionSummary {
            final_state: status.state,
            ticks: status.tick_count,
            elapsed_minutes: started.elapsed().as_secs_f64() / 60.0,
            samples_retained: status.samples_retained,
            samples_dropped: status.samples_dropped,
            trace_file: self.trace_file,
            export_file,
            aborted,
        };
        info!(
            "Regulation task stopped in state '{}' after {} ticks",
            summary.final_state, summary.ticks
        );
        shutdown.map(|_| summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
