// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_annealer::config::{self, Config, DriverConfig, PidParameters};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_and_save() -> Result<()> {
    // Create a temporary directory
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Create a custom config
    let mut config = Config::default();
    config.thermal_regulation.v_max = 4.5;
    config.thermal_regulation.pid = PidParameters {
        kp: 0.02,
        ki: 0.0005,
        kd: 0.1,
    };
    config.recorder.capacity = 2048;
    config.recorder.export_file = Some(PathBuf::from("run.json"));

    // Save config to file
    config.save_to_file(&config_path)?;

    // Load config from file
    let loaded_config = Config::from_file(&config_path)?;

    // Verify loaded config matches original
    assert_eq!(loaded_config, config);

    // Test loading default config for non-existent file
    let non_existent_path = temp_dir.path().join("non_existent.yaml");
    let default_config = Config::from_file(&non_existent_path)?;

    // Verify default config was created and is loadable
    assert!(non_existent_path.exists());
    assert_eq!(default_config, Config::default());
    assert_eq!(Config::from_file(&non_existent_path)?, Config::default());

    Ok(())
}

#[test]
fn test_apply_args() {
    let mut config = Config::default();
    assert_eq!(config.thermal_regulation.tick_period_ms, 500);
    assert!(config.recorder.export_file.is_none());

    // Apply command-line arguments
    config.apply_args(
        Some(PathBuf::from("other.csv")),
        Some(PathBuf::from("other.json")),
        Some(250),
    );

    // Verify values were overridden
    assert_eq!(config.recorder.trace_file, PathBuf::from("other.csv"));
    assert_eq!(config.recorder.export_file, Some(PathBuf::from("other.json")));
    assert_eq!(config.thermal_regulation.tick_period_ms, 250);

    // Absent arguments leave the configuration untouched
    let before = config.clone();
    config.apply_args(None, None, None);
    assert_eq!(config, before);
}

#[test]
fn test_minimal_file_uses_defaults() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("minimal.yaml");
    fs::write(
        &config_path,
        "thermal_regulation:\n  v_max: 5.0\ndriver:\n  type: simulated\n  seed: 3\n",
    )?;

    let config = Config::from_file(&config_path)?;
    assert_eq!(config.thermal_regulation.v_max, 5.0);
    assert_eq!(config.thermal_regulation.tolerance_celsius, 1.0);
    assert_eq!(config.recorder.capacity, 10_000);
    let DriverConfig::Simulated(sim) = config.driver;
    assert_eq!(sim.seed, Some(3));
    Ok(())
}

#[test]
fn test_config_schema_output() -> Result<()> {
    // The schema goes to stdout; this checks it is embedded and well formed
    config::output_config_schema()?;
    Ok(())
}

#[test]
fn test_default_config_passes_specific_rules() -> Result<()> {
    config::validate_specific_rules(&Config::default())?;
    Ok(())
}
