// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Session control commands
//!
//! Commands come from the operator surface at any time. They are queued on a
//! single-consumer channel and applied by the controller at the top of the
//! next tick, never while a tick is half-way through its computation.

use anyhow::{anyhow, Result};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

use super::anneal::AnnealMode;
use super::controller::ControlState;

/// Reasons a command is rejected. The session is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Invalid target temperature: {0} °C (must be a finite value >= 0)")]
    InvalidTarget(f64),

    #[error("Invalid anneal field '{field}': {value}")]
    InvalidField { field: &'static str, value: f64 },

    #[error("End voltage {end_value} V is outside [0, {v_max}] V")]
    EndVoltageOutOfRange { end_value: f64, v_max: f64 },

    #[error("Unknown anneal mode '{0}' (expected 'temperature' or 'voltage')")]
    UnknownMode(String),

    #[error("Command '{command}' is not accepted while {state}")]
    NotAccepted {
        command: &'static str,
        state: ControlState,
    },

    #[error("Cannot parse command: {0}")]
    Parse(String),
}

/// Commands that can be sent to the regulation controller
#[derive(Debug, Clone, PartialEq)]
pub enum AnnealCommand {
    /// Seek a new setpoint
    SetTarget { celsius: f64 },
    /// Start (or replace) an annealing ramp
    StartAnneal {
        mode: AnnealMode,
        end_value: f64,
        step_size: f64,
        step_period_minutes: f64,
    },
    /// Stop the session at the next tick
    RequestExit,
}

impl AnnealCommand {
    /// Short name used in log and rejection messages
    pub fn name(&self) -> &'static str {
        match self {
            AnnealCommand::SetTarget { .. } => "target",
            AnnealCommand::StartAnneal { .. } => "anneal",
            AnnealCommand::RequestExit => "exit",
        }
    }
}

fn parse_number(token: Option<&str>, what: &str) -> Result<f64, CommandError> {
    let token = token.ok_or_else(|| CommandError::Parse(format!("missing {}", what)))?;
    token
        .parse::<f64>()
        .map_err(|_| CommandError::Parse(format!("'{}' is not a valid {}", token, what)))
}

/// Console grammar:
///
/// ```text
/// target <celsius>
/// anneal <temperature|voltage> <end_value> <step_volts> <period_minutes>
/// exit | quit
/// ```
impl FromStr for AnnealCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens
            .next()
            .ok_or_else(|| CommandError::Parse("empty command".to_string()))?;

        let command = match keyword.to_ascii_lowercase().as_str() {
            "target" | "t" => AnnealCommand::SetTarget {
                celsius: parse_number(tokens.next(), "temperature")?,
            },
            "anneal" | "a" => {
                let mode = tokens
                    .next()
                    .ok_or_else(|| CommandError::Parse("missing anneal mode".to_string()))?
                    .parse::<AnnealMode>()?;
                AnnealCommand::StartAnneal {
                    mode,
                    end_value: parse_number(tokens.next(), "end value")?,
                    step_size: parse_number(tokens.next(), "step size")?,
                    step_period_minutes: parse_number(tokens.next(), "step period")?,
                }
            }
            "exit" | "quit" | "q" => AnnealCommand::RequestExit,
            other => return Err(CommandError::Parse(format!("unknown command '{}'", other))),
        };

        if let Some(extra) = tokens.next() {
            return Err(CommandError::Parse(format!("unexpected argument '{}'", extra)));
        }
        Ok(command)
    }
}

/// Cloneable handle used by operator surfaces to queue commands
#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: mpsc::UnboundedSender<AnnealCommand>,
}

impl CommandSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<AnnealCommand>) -> Self {
        Self { sender }
    }

    /// Queue any command
    pub fn send(&self, command: AnnealCommand) -> Result<()> {
        let name = command.name();
        self.sender
            .send(command)
            .map_err(|e| anyhow!("Failed to send {} command: {}", name, e))
    }

    /// Queue a new setpoint
    pub fn set_target(&self, celsius: f64) -> Result<()> {
        self.send(AnnealCommand::SetTarget { celsius })
    }

    /// Queue an annealing run
    pub fn start_anneal(
        &self,
        mode: AnnealMode,
        end_value: f64,
        step_size: f64,
        step_period_minutes: f64,
    ) -> Result<()> {
        self.send(AnnealCommand::StartAnneal {
            mode,
            end_value,
            step_size,
            step_period_minutes,
        })
    }

    /// Ask the session to stop at the next tick
    pub fn request_exit(&self) -> Result<()> {
        self.send(AnnealCommand::RequestExit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            "target 450".parse::<AnnealCommand>().unwrap(),
            AnnealCommand::SetTarget { celsius: 450.0 }
        );
        assert_eq!(
            "  T   12.5 ".parse::<AnnealCommand>().unwrap(),
            AnnealCommand::SetTarget { celsius: 12.5 }
        );
    }

    #[test]
    fn test_parse_anneal() {
        assert_eq!(
            "anneal voltage 1.0 -0.005 2".parse::<AnnealCommand>().unwrap(),
            AnnealCommand::StartAnneal {
                mode: AnnealMode::Voltage,
                end_value: 1.0,
                step_size: -0.005,
                step_period_minutes: 2.0,
            }
        );
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(
            "quit".parse::<AnnealCommand>().unwrap(),
            AnnealCommand::RequestExit
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<AnnealCommand>().is_err());
        assert!("target".parse::<AnnealCommand>().is_err());
        assert!("target hot".parse::<AnnealCommand>().is_err());
        assert!("target 450 now".parse::<AnnealCommand>().is_err());
        assert!("anneal pressure 1 1 1".parse::<AnnealCommand>().is_err());
        assert!("anneal voltage 1 -0.01".parse::<AnnealCommand>().is_err());
        assert!("dance".parse::<AnnealCommand>().is_err());
    }

    #[tokio::test]
    async fn test_sender_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = CommandSender::new(tx);
        assert!(sender.set_target(100.0).is_ok());
        drop(rx);
        assert!(sender.request_exit().is_err());
    }
}
