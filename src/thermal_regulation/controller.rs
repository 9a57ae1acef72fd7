// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Regulation controller state machine
//!
//! The controller owns the session state, the hardware handles and the
//! process recorder. It is driven by [`Controller::tick`], called once per
//! scheduler period by the daemon. A tick runs, in order:
//!
//! 1. Drain queued operator commands
//! 2. Read one averaged temperature (no reading: degraded tick, nothing else happens)
//! 3. Record the sample
//! 4. Regulate while seeking or holding a target (PID, anti-windup, clamp, command)
//! 5. Evaluate the state transition (stability window or annealing ramp)
//! 6. Project the status line and title
//!
//! ```text
//! WaitingForInitialTarget --target--> FindingTemperature <--> CheckingStability --> Stable
//!                                            ^                                        |
//!                                            +---------------- out of band -----------+
//! Finding/Checking/Stable --anneal--> Annealing --end reached--> IdleAfterAnneal --target--> Finding
//! ```

use anyhow::{bail, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::anneal::{AnnealDecision, AnnealPlan};
use super::commands::{AnnealCommand, CommandError, CommandSender};
use super::initial_guess::initial_voltage;
use super::pid::{self, PidComponents};
use super::recorder::{ProcessRecorder, Sample};
use super::shared_state::AnnealStatus;
use super::stability::is_stable;
use super::{ActuatorChannel, TemperatureSource};
use crate::config::ThermalRegulationConfig;

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    /// No target has been given yet; the heater is left alone
    WaitingForInitialTarget,
    /// Regulating towards the target, error outside the tolerance band
    FindingTemperature,
    /// Regulating inside the band while the stability window fills
    CheckingStability,
    /// Certified settled; an annealing run may be started
    Stable,
    /// Stepping the supply voltage according to the annealing plan
    Annealing,
    /// Ramp finished, heater off, waiting for a new target
    IdleAfterAnneal,
}

impl ControlState {
    /// States in which the PID law drives the actuator
    pub fn is_regulating(&self) -> bool {
        matches!(
            self,
            ControlState::FindingTemperature
                | ControlState::CheckingStability
                | ControlState::Stable
        )
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::WaitingForInitialTarget => "waiting for an initial target",
            ControlState::FindingTemperature => "finding temperature",
            ControlState::CheckingStability => "checking stability",
            ControlState::Stable => "stable",
            ControlState::Annealing => "annealing",
            ControlState::IdleAfterAnneal => "idle after anneal",
        };
        f.write_str(name)
    }
}

/// Samples collected while certifying stability
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityWindow {
    /// Session time at which the error entered the band
    pub opened_at: Duration,
    /// Temperatures observed since then, including the opening one
    pub samples: Vec<f64>,
}

/// Mutable session state, written only from inside a tick
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSession {
    pub state: ControlState,
    pub target: Option<f64>,
    /// Last commanded voltage, always within `[0, v_max]`
    pub voltage: f64,
    /// Committed PID integral accumulator (°C·s)
    pub integral: f64,
    /// Previous valid reading, for the derivative term
    pub last_temperature: Option<f64>,
    /// Session time of the previous valid reading
    pub last_reading_at: Option<Duration>,
    pub plan: Option<AnnealPlan>,
    /// Session time of the last ramp step (or of the plan acceptance)
    pub last_step_at: Option<Duration>,
    pub window: Option<StabilityWindow>,
}

impl Default for ControlSession {
    fn default() -> Self {
        Self {
            state: ControlState::WaitingForInitialTarget,
            target: None,
            voltage: 0.0,
            integral: 0.0,
            last_temperature: None,
            last_reading_at: None,
            plan: None,
            last_step_at: None,
            window: None,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Status projection after the tick
    pub status: AnnealStatus,
    /// Sample recorded this tick, if the reading was valid
    pub sample: Option<Sample>,
    /// State change, if any
    pub transition: Option<(ControlState, ControlState)>,
}

/// Result of a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Keep scheduling
    Continue(TickReport),
    /// An exit was requested; the caller must run the shutdown path
    Exit,
}

/// The regulation controller
pub struct Controller {
    config: ThermalRegulationConfig,
    session: ControlSession,
    source: Box<dyn TemperatureSource>,
    actuator: Box<dyn ActuatorChannel>,
    recorder: ProcessRecorder,
    command_tx: mpsc::UnboundedSender<AnnealCommand>,
    command_rx: mpsc::UnboundedReceiver<AnnealCommand>,
    /// Last notice for the operator (rejections, completions)
    notice: Option<String>,
    last_components: Option<PidComponents>,
    last_elapsed: Duration,
    degraded: bool,
    tick_count: u64,
    shut_down: bool,
}

impl Controller {
    pub fn new(
        config: ThermalRegulationConfig,
        source: Box<dyn TemperatureSource>,
        actuator: Box<dyn ActuatorChannel>,
        recorder: ProcessRecorder,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            session: ControlSession::default(),
            source,
            actuator,
            recorder,
            command_tx,
            command_rx,
            notice: None,
            last_components: None,
            last_elapsed: Duration::ZERO,
            degraded: false,
            tick_count: 0,
            shut_down: false,
        }
    }

    /// Handle used by operator surfaces to queue commands
    pub fn handle(&self) -> CommandSender {
        CommandSender::new(self.command_tx.clone())
    }

    pub fn session(&self) -> &ControlSession {
        &self.session
    }

    pub fn state(&self) -> ControlState {
        self.session.state
    }

    pub fn recorder(&self) -> &ProcessRecorder {
        &self.recorder
    }

    pub fn config(&self) -> &ThermalRegulationConfig {
        &self.config
    }

    /// Run one control period.
    ///
    /// `now` is the monotonic session time. Transient hardware faults are
    /// absorbed here; an `Err` means the session cannot continue.
    pub async fn tick(&mut self, now: Duration) -> Result<TickOutcome> {
        if self.shut_down {
            bail!("Controller has been shut down");
        }
        self.tick_count += 1;
        self.last_elapsed = now;
        let state_before = self.session.state;

        while let Ok(command) = self.command_rx.try_recv() {
            if command == AnnealCommand::RequestExit {
                info!("Exit requested, stopping regulation");
                return Ok(TickOutcome::Exit);
            }
            self.apply_command(command, now).await;
        }

        let temperature = match self.read_temperature().await {
            Some(temperature) => temperature,
            None => {
                self.degraded = true;
                return Ok(TickOutcome::Continue(
                    self.report(None, state_before, None),
                ));
            }
        };
        self.degraded = false;

        let sample = Sample {
            elapsed_minutes: now.as_secs_f64() / 60.0,
            temperature_celsius: temperature,
            voltage: self.session.voltage,
            target_celsius: self.session.target.unwrap_or(f64::NAN),
        };
        self.recorder.append(sample)?;

        let dt = match self.session.last_reading_at {
            Some(previous) => now.saturating_sub(previous).as_secs_f64(),
            None => self.config.tick_period().as_secs_f64(),
        };

        if self.session.state.is_regulating() {
            if let Some(target) = self.session.target {
                self.regulate(target, temperature, dt).await;
            }
        }
        self.session.last_temperature = Some(temperature);
        self.session.last_reading_at = Some(now);

        self.evaluate_transition(temperature, now).await;

        Ok(TickOutcome::Continue(self.report(
            Some(temperature),
            state_before,
            Some(sample),
        )))
    }

    /// Orderly stop: zero the actuator, close the trace, release the hardware.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!("Shutting down regulation: heater to 0 V");

        self.command_voltage(0.0).await;
        let closed = self.recorder.close();

        if let Err(e) = self.actuator.release().await {
            warn!("Failed to release heater supply: {}", e);
        }
        if let Err(e) = self.source.release().await {
            warn!("Failed to release temperature source: {}", e);
        }
        closed
    }

    /// Status projection of the current session
    pub fn status(&self) -> AnnealStatus {
        let session = &self.session;
        let target = session
            .target
            .map(|t| format!("{:.1} °C", t))
            .unwrap_or_else(|| "none".to_string());
        let temperature = session
            .last_temperature
            .map(|t| format!("{:.2} °C", t))
            .unwrap_or_else(|| "--".to_string());
        let title = format!(
            "Anneal regulator | {} | target {} | {} | {:.4} V",
            session.state, target, temperature, session.voltage
        );

        let mut message = self.state_message();
        if self.degraded {
            message = format!(
                "No valid temperature reading, holding {:.4} V. {}",
                session.voltage, message
            );
        }
        if let Some(notice) = &self.notice {
            message = format!("{} ({})", message, notice);
        }

        AnnealStatus {
            state: session.state,
            title,
            message,
            temperature_celsius: session.last_temperature,
            target_celsius: session.target,
            voltage: session.voltage,
            elapsed_minutes: self.last_elapsed.as_secs_f64() / 60.0,
            plan: session.plan.map(|plan| plan.to_string()),
            anneal_available: session.state == ControlState::Stable,
            degraded: self.degraded,
            pid_components: self.last_components,
            samples_retained: self.recorder.len(),
            samples_dropped: self.recorder.dropped_count(),
            tick_count: self.tick_count,
        }
    }

    fn state_message(&self) -> String {
        let session = &self.session;
        match session.state {
            ControlState::WaitingForInitialTarget => {
                "Waiting for a target temperature".to_string()
            }
            ControlState::FindingTemperature => match (session.target, session.last_temperature) {
                (Some(target), Some(temperature)) => format!(
                    "Seeking {:.1} °C (error {:+.2} °C)",
                    target,
                    target - temperature
                ),
                (Some(target), None) => format!("Seeking {:.1} °C", target),
                _ => "Seeking target".to_string(),
            },
            ControlState::CheckingStability => match &session.window {
                Some(window) => format!(
                    "Checking stability: {:.0} s of {:.0} s observed, {} samples",
                    self.last_elapsed
                        .saturating_sub(window.opened_at)
                        .as_secs_f64(),
                    self.config.stability.observation_seconds,
                    window.samples.len()
                ),
                None => "Checking stability".to_string(),
            },
            ControlState::Stable => format!(
                "Stable at {:.1} °C, ready to anneal",
                session.target.unwrap_or(f64::NAN)
            ),
            ControlState::Annealing => match (session.plan, session.last_step_at) {
                (Some(plan), Some(last_step)) => {
                    let since = self.last_elapsed.saturating_sub(last_step);
                    format!(
                        "Annealing {}; next step in {:.0} s",
                        plan,
                        plan.step_period.saturating_sub(since).as_secs_f64()
                    )
                }
                _ => "Annealing".to_string(),
            },
            ControlState::IdleAfterAnneal => {
                "Anneal complete, heater off. Enter a new target to continue".to_string()
            }
        }
    }

    fn report(
        &self,
        temperature: Option<f64>,
        state_before: ControlState,
        sample: Option<Sample>,
    ) -> TickReport {
        let transition =
            (state_before != self.session.state).then_some((state_before, self.session.state));
        if temperature.is_none() {
            debug!("Degraded tick #{} in {}", self.tick_count, self.session.state);
        }
        TickReport {
            status: self.status(),
            sample,
            transition,
        }
    }

    /// Run the PID law and command the clamped result
    async fn regulate(&mut self, target: f64, temperature: f64, dt: f64) {
        let v_max = self.config.v_max;
        let output = pid::regulate(
            target - temperature,
            temperature,
            self.session.last_temperature,
            self.session.integral,
            dt,
            &self.config.pid,
        );
        let unclamped = self.session.voltage + output.delta;

        // Anti-windup: the integral only moves when the output is not saturated
        if (0.0..=v_max).contains(&unclamped) {
            self.session.integral = output.trial_integral;
        }

        let next = if unclamped.is_finite() {
            unclamped.clamp(0.0, v_max)
        } else {
            warn!("Regulator produced a non-finite output, holding {:.4} V", self.session.voltage);
            self.session.voltage
        };
        debug!(
            "PID: error {:+.3} °C, P {:+.5}, I {:+.5}, D {:+.5} -> {:.4} V",
            output.components.error,
            output.components.proportional,
            output.components.integral,
            output.components.derivative,
            next
        );
        self.last_components = Some(output.components);
        self.command_voltage(next).await;
    }

    async fn evaluate_transition(&mut self, temperature: f64, now: Duration) {
        let in_band = self
            .session
            .target
            .map(|target| (target - temperature).abs() <= self.config.tolerance_celsius)
            .unwrap_or(false);

        match self.session.state {
            ControlState::FindingTemperature => {
                if in_band {
                    self.session.window = Some(StabilityWindow {
                        opened_at: now,
                        samples: vec![temperature],
                    });
                    self.set_state(ControlState::CheckingStability);
                }
            }
            ControlState::CheckingStability => {
                if !in_band {
                    info!("Temperature left the tolerance band, stability window abandoned");
                    self.session.window = None;
                    self.set_state(ControlState::FindingTemperature);
                    return;
                }
                let Some(window) = self.session.window.as_mut() else {
                    self.session.window = Some(StabilityWindow {
                        opened_at: now,
                        samples: vec![temperature],
                    });
                    return;
                };
                window.samples.push(temperature);
                let observed = now.saturating_sub(window.opened_at).as_secs_f64();
                if observed >= self.config.stability.observation_seconds {
                    let stable =
                        is_stable(&window.samples, self.config.stability.stdev_threshold);
                    info!(
                        "Stability window closed after {:.0} s with {} samples: {}",
                        observed,
                        window.samples.len(),
                        if stable { "stable" } else { "not stable" }
                    );
                    self.session.window = None;
                    self.set_state(if stable {
                        ControlState::Stable
                    } else {
                        ControlState::FindingTemperature
                    });
                }
            }
            ControlState::Stable => {
                if !in_band {
                    self.set_state(ControlState::FindingTemperature);
                }
            }
            ControlState::Annealing => self.advance_anneal(temperature, now).await,
            ControlState::WaitingForInitialTarget | ControlState::IdleAfterAnneal => {}
        }
    }

    async fn advance_anneal(&mut self, temperature: f64, now: Duration) {
        let Some(plan) = self.session.plan else {
            warn!("Annealing without a plan, going idle");
            self.command_voltage(0.0).await;
            self.set_state(ControlState::IdleAfterAnneal);
            return;
        };
        let since_last_step = now.saturating_sub(self.session.last_step_at.unwrap_or(now));

        match plan.evaluate(temperature, self.session.voltage, since_last_step, self.config.v_max) {
            AnnealDecision::Complete => {
                info!(
                    "Anneal complete at {:.2} °C, {:.4} V: heater off",
                    temperature, self.session.voltage
                );
                self.command_voltage(0.0).await;
                self.notice = Some("anneal complete".to_string());
                self.set_state(ControlState::IdleAfterAnneal);
            }
            AnnealDecision::Step(volts) => {
                info!(
                    "Anneal step: {:.4} V -> {:.4} V at {:.2} °C",
                    self.session.voltage, volts, temperature
                );
                self.command_voltage(volts).await;
                self.session.last_step_at = Some(now);
            }
            AnnealDecision::Hold => {}
        }
    }

    async fn apply_command(&mut self, command: AnnealCommand, now: Duration) {
        let name = command.name();
        match self.try_apply_command(command, now).await {
            Ok(()) => self.notice = None,
            Err(e) => {
                warn!("Rejected {} command: {}", name, e);
                self.notice = Some(format!("rejected: {}", e));
            }
        }
    }

    async fn try_apply_command(
        &mut self,
        command: AnnealCommand,
        now: Duration,
    ) -> Result<(), CommandError> {
        match command {
            AnnealCommand::SetTarget { celsius } => {
                if !(celsius.is_finite() && celsius >= 0.0) {
                    return Err(CommandError::InvalidTarget(celsius));
                }
                if self.session.state.is_regulating() {
                    info!("Target changed to {:.1} °C", celsius);
                    self.session.target = Some(celsius);
                    self.session.window = None;
                } else {
                    let guess = initial_voltage(
                        &self.config.initial_voltage_table,
                        celsius,
                        self.config.v_max,
                    );
                    info!(
                        "New target {:.1} °C, initial voltage guess {:.4} V",
                        celsius, guess
                    );
                    self.session.target = Some(celsius);
                    self.session.integral = 0.0;
                    self.session.last_temperature = None;
                    self.session.last_reading_at = None;
                    self.session.window = None;
                    self.session.plan = None;
                    self.session.last_step_at = None;
                    self.command_voltage(guess).await;
                }
                self.set_state(ControlState::FindingTemperature);
                Ok(())
            }
            AnnealCommand::StartAnneal {
                mode,
                end_value,
                step_size,
                step_period_minutes,
            } => {
                let state = self.session.state;
                if !(state.is_regulating() || state == ControlState::Annealing) {
                    return Err(CommandError::NotAccepted {
                        command: "anneal",
                        state,
                    });
                }
                let plan = AnnealPlan::new(
                    mode,
                    end_value,
                    step_size,
                    step_period_minutes,
                    self.config.v_max,
                )?;
                info!("Starting anneal: {}", plan);
                self.session.plan = Some(plan);
                self.session.last_step_at = Some(now);
                self.session.window = None;
                self.set_state(ControlState::Annealing);
                Ok(())
            }
            AnnealCommand::RequestExit => Ok(()),
        }
    }

    fn set_state(&mut self, next: ControlState) {
        if self.session.state != next {
            info!("State change: {} -> {}", self.session.state, next);
            self.session.state = next;
        }
    }

    /// One averaged reading, `None` on failure, timeout or a non-finite value
    async fn read_temperature(&mut self) -> Option<f64> {
        let limit = self.config.io_timeout();
        match timeout(limit, self.source.read_averaged_temperature()).await {
            Ok(Ok(temperature)) if temperature.is_finite() => Some(temperature),
            Ok(Ok(temperature)) => {
                warn!("Discarding non-finite temperature reading: {}", temperature);
                None
            }
            Ok(Err(e)) => {
                warn!("Temperature read failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Temperature read timed out after {:?}", limit);
                None
            }
        }
    }

    /// Command the supply; the voltage state takes the value even if the command fails
    async fn command_voltage(&mut self, volts: f64) {
        let volts = volts.clamp(0.0, self.config.v_max);
        self.session.voltage = volts;
        let limit = self.config.io_timeout();
        match timeout(limit, self.actuator.set_voltage(volts)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to command {:.4} V: {}", volts, e),
            Err(_) => warn!("Command of {:.4} V timed out after {:?}", volts, limit),
        }
    }
}
