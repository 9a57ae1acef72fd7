// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the furnace anneal regulator
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::signal;

use rust_annealer::config::{self, Config};
use rust_annealer::daemon::Daemon;
use rust_annealer::thermal_regulation::{AnnealCommand, CommandSender};

/// Closed-loop furnace regulator with stability certification and annealing ramps
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Initial target temperature in °C
    #[arg(long)]
    target: Option<f64>,

    /// Append-only CSV trace file
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// JSON export written when the session ends
    #[arg(long)]
    export_file: Option<PathBuf>,

    /// Regulation tick period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Do not read commands from standard input
    #[arg(long)]
    no_console: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

const CONSOLE_HELP: &str = "Commands:
  target <celsius>
  anneal <temperature|voltage> <end_value> <step_volts> <period_minutes>
  exit";

/// Read operator commands from stdin on a dedicated thread.
///
/// Blocking reads stay off the runtime; the thread ends with the process.
fn spawn_console(sender: CommandSender) {
    std::thread::spawn(move || {
        println!("{}", CONSOLE_HELP);
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read from stdin: {}", e);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<AnnealCommand>() {
                Ok(command) => {
                    if sender.send(command).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    println!("{}", CONSOLE_HELP);
                }
            }
        }
        info!("Standard input closed, requesting exit");
        if let Err(e) = sender.request_exit() {
            warn!("{}", e);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger with appropriate level based on verbose and quiet flags
    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    // Check if --show-config-schema flag is set
    if args.show_config_schema {
        return config::output_config_schema();
    }

    // Validate configuration file if --validate-config is set
    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    // Load configuration
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    // Apply command line overrides
    config.apply_args(args.trace_file.clone(), args.export_file.clone(), args.tick_ms);
    config::validate_specific_rules(&config)?;

    info!("Starting anneal regulator");
    let mut daemon = Daemon::new();
    let commands = daemon.launch(&config).await?;

    if let Some(target) = args.target {
        commands.set_target(target)?;
    }
    if !args.no_console {
        spawn_console(commands.clone());
    }

    // Wait for termination signal or for the session to end on its own
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal, terminating daemon"),
                Err(err) => error!("Error waiting for shutdown signal: {}", err),
            }
            daemon.shutdown();
        }
        _ = daemon.wait_stopped() => {}
    }

    match daemon.join().await? {
        Some(summary) => {
            info!(
                "Session ended in state '{}' after {:.1} min, trace in {}",
                summary.final_state,
                summary.elapsed_minutes,
                summary.trace_file.display()
            );
            if let Some(message) = summary.aborted {
                return Err(anyhow::anyhow!("Regulation session aborted: {}", message));
            }
        }
        None => warn!("No regulation session was running"),
    }

    Ok(())
}
