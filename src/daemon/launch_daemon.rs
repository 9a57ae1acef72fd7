// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{anyhow, Result};
use log::{debug, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::thermal_regulation::daemon::{AnnealRegulatorDaemon, SessionSummary};
use crate::thermal_regulation::shared_state::{create_shared_anneal_state, SharedAnnealState};
use crate::thermal_regulation::CommandSender;

/// Default period between two heartbeat log lines
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Granularity at which background tasks notice the running flag
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Represents a daemon task that can be started and managed
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    shared_state: SharedAnnealState,
    regulation: Option<AnnealRegulatorDaemon>,
    heartbeat_period: Duration,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            shared_state: create_shared_anneal_state(),
            regulation: None,
            heartbeat_period: HEARTBEAT_PERIOD,
        }
    }

    /// Override the heartbeat period
    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    /// Launch the regulation session and the heartbeat monitor
    pub async fn launch(&mut self, config: &Config) -> Result<CommandSender> {
        let sender = self.start_regulation(config)?;

        // Start heartbeat task for monitoring
        self.start_heartbeat()?;

        Ok(sender)
    }

    fn start_regulation(&mut self, config: &Config) -> Result<CommandSender> {
        if self.regulation.is_some() {
            return Err(anyhow!("Regulation session already launched"));
        }
        let mut regulation = AnnealRegulatorDaemon::new(
            config.clone(),
            self.shared_state.clone(),
            self.running.clone(),
        );
        let sender = regulation.start()?;
        self.regulation = Some(regulation);
        Ok(sender)
    }

    /// Start a heartbeat task that logs the session status periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let shared_state = self.shared_state.clone();
        let period = self.heartbeat_period;
        let task = tokio::spawn(async move {
            let mut last_beat = Instant::now();
            while running.load(Ordering::SeqCst) {
                time::sleep(POLL_PERIOD.min(period)).await;
                if last_beat.elapsed() >= period {
                    let state = shared_state.read().await;
                    let status = state.get_status();
                    debug!(
                        "Daemon heartbeat: {:?}, {} ({} ticks)",
                        state.get_phase(),
                        status.state,
                        status.tick_count
                    );
                    last_beat = Instant::now();
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Whether the daemon is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once the running flag is cleared, by shutdown or by the session ending
    pub async fn wait_stopped(&self) {
        while self.is_running() {
            time::sleep(POLL_PERIOD).await;
        }
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        if let Some(sender) = self
            .regulation
            .as_ref()
            .and_then(|regulation| regulation.command_sender())
        {
            if let Err(e) = sender.request_exit() {
                debug!("Regulation session already gone: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        // Tasks should check the running flag and terminate gracefully
    }

    /// Wait for all tasks to complete, returning the regulation summary
    pub async fn join(mut self) -> Result<Option<SessionSummary>> {
        let summary = match self.regulation.as_mut() {
            Some(regulation) => Some(regulation.join().await?),
            None => None,
        };
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Task panicked: {}", e);
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.thermal_regulation.tick_period_ms = 10;
        config.recorder.trace_file = dir.join("trace.csv");
        config
    }

    #[tokio::test]
    async fn test_launch_and_shutdown() -> Result<()> {
        let dir = tempdir()?;
        let mut daemon = Daemon::new().with_heartbeat_period(Duration::from_millis(20));
        let sender = daemon.launch(&test_config(dir.path())).await?;
        sender.set_target(200.0)?;
        time::sleep(Duration::from_millis(100)).await;
        assert!(daemon.is_running());

        daemon.shutdown();
        daemon.wait_stopped().await;
        let summary = daemon.join().await?;
        assert!(summary.map(|s| s.ticks > 0).unwrap_or(false));
        Ok(())
    }

    #[tokio::test]
    async fn test_session_exit_stops_daemon() -> Result<()> {
        let dir = tempdir()?;
        let mut daemon = Daemon::new();
        let sender = daemon.launch(&test_config(dir.path())).await?;
        sender.request_exit()?;

        tokio::time::timeout(Duration::from_secs(5), daemon.wait_stopped()).await?;
        let summary = daemon.join().await?;
        assert!(summary.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_launch_twice_fails() -> Result<()> {
        let dir = tempdir()?;
        let config = test_config(dir.path());
        let mut daemon = Daemon::new();
        daemon.launch(&config).await?;
        assert!(daemon.launch(&config).await.is_err());
        daemon.shutdown();
        daemon.join().await?;
        Ok(())
    }
}
