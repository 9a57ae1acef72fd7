// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end regulation runs against the furnace model on a virtual clock.

use anyhow::Result;
use rust_annealer::config::{SimulatedFurnaceConfig, ThermalRegulationConfig};
use rust_annealer::thermal_regulation::anneal::AnnealMode;
use rust_annealer::thermal_regulation::controller::TickOutcome;
use rust_annealer::thermal_regulation::drivers::FurnaceSimulation;
use rust_annealer::thermal_regulation::recorder::{ProcessRecorder, TRACE_HEADER};
use rust_annealer::thermal_regulation::{
    ActuatorChannel, ControlState, Controller, TemperatureSource,
};
use std::fs;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::tempdir;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .init();
    });
}

const TICK_SECONDS: f64 = 0.5;

/// Furnace model advanced explicitly by the test instead of by wall-clock time
#[derive(Clone)]
struct VirtualFurnace {
    model: Arc<Mutex<FurnaceSimulation>>,
}

impl VirtualFurnace {
    fn new() -> Self {
        let config = SimulatedFurnaceConfig {
            noise_celsius: 0.0,
            ..Default::default()
        };
        Self {
            model: Arc::new(Mutex::new(FurnaceSimulation::new(&config))),
        }
    }

    fn advance(&self, seconds: f64) {
        self.model.lock().unwrap().advance(seconds);
    }

    fn applied_voltage(&self) -> f64 {
        self.model.lock().unwrap().voltage()
    }
}

#[async_trait::async_trait]
impl TemperatureSource for VirtualFurnace {
    async fn read_averaged_temperature(&mut self) -> Result<f64> {
        Ok(self.model.lock().unwrap().temperature())
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActuatorChannel for VirtualFurnace {
    async fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.model.lock().unwrap().set_voltage(volts);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.model.lock().unwrap().set_voltage(0.0);
        Ok(())
    }
}

struct Rig {
    furnace: VirtualFurnace,
    controller: Controller,
    now: f64,
}

impl Rig {
    fn new(recorder: ProcessRecorder) -> Self {
        setup();
        let furnace = VirtualFurnace::new();
        let controller = Controller::new(
            ThermalRegulationConfig::default(),
            Box::new(furnace.clone()),
            Box::new(furnace.clone()),
            recorder,
        );
        Self {
            furnace,
            controller,
            now: 0.0,
        }
    }

    /// One scheduler period: the plant evolves, then the controller ticks
    async fn step(&mut self) -> TickOutcome {
        self.furnace.advance(TICK_SECONDS);
        self.now += TICK_SECONDS;
        let outcome = self
            .controller
            .tick(Duration::from_secs_f64(self.now))
            .await
            .unwrap();

        let v_max = self.controller.config().v_max;
        let voltage = self.controller.session().voltage;
        assert!(
            (0.0..=v_max).contains(&voltage),
            "commanded voltage {} outside [0, {}]",
            voltage,
            v_max
        );
        assert_eq!(self.furnace.applied_voltage(), voltage);
        assert!(self.controller.recorder().len() < self.controller.recorder().capacity());
        outcome
    }

    /// Tick until `state` is reached, returning the number of ticks used
    async fn run_until(&mut self, state: ControlState, max_ticks: usize) -> usize {
        for tick in 1..=max_ticks {
            self.step().await;
            if self.controller.state() == state {
                return tick;
            }
        }
        panic!(
            "state {} not reached within {} ticks (now {}, temperature {:?})",
            state,
            max_ticks,
            self.controller.state(),
            self.controller.session().last_temperature
        );
    }
}

#[tokio::test]
async fn test_seek_certify_and_anneal_down() {
    let mut rig = Rig::new(ProcessRecorder::new(10_000));
    let handle = rig.controller.handle();
    handle.set_target(300.0).unwrap();

    rig.run_until(ControlState::CheckingStability, 4_000).await;
    rig.run_until(ControlState::Stable, 10_000).await;
    let temperature = rig.controller.session().last_temperature.unwrap();
    assert!((temperature - 300.0).abs() <= 1.0);

    handle
        .start_anneal(AnnealMode::Temperature, 250.0, -0.05, 0.05)
        .unwrap();
    rig.step().await;
    assert_eq!(rig.controller.state(), ControlState::Annealing);

    // Voltage only ever goes down during a descending ramp
    let mut last_voltage = rig.controller.session().voltage;
    for _ in 0..10_000 {
        rig.step().await;
        let voltage = rig.controller.session().voltage;
        if rig.controller.state() == ControlState::IdleAfterAnneal {
            break;
        }
        assert!(voltage <= last_voltage);
        last_voltage = voltage;
    }

    assert_eq!(rig.controller.state(), ControlState::IdleAfterAnneal);
    assert_eq!(rig.controller.session().voltage, 0.0);
    assert!(rig.controller.session().last_temperature.unwrap() < 250.0 - 0.1);

    // Idle holds with the heater off
    for _ in 0..20 {
        rig.step().await;
    }
    assert_eq!(rig.controller.state(), ControlState::IdleAfterAnneal);
    assert_eq!(rig.furnace.applied_voltage(), 0.0);
}

#[tokio::test]
async fn test_bounded_recorder_and_complete_trace_log() -> Result<()> {
    let dir = tempdir()?;
    let trace_path = dir.path().join("trace.csv");
    let mut rig = Rig::new(ProcessRecorder::with_trace_log(64, &trace_path)?);
    rig.controller.handle().set_target(150.0)?;

    let ticks = 500;
    for _ in 0..ticks {
        rig.step().await;
    }

    let recorder = rig.controller.recorder();
    assert!(recorder.len() < 64);
    assert_eq!(recorder.len() + recorder.dropped_count(), ticks);
    let times = recorder.times();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    let array = recorder.to_array();
    assert_eq!(array.shape(), &[recorder.len(), 4]);
    assert!(array.column(3).iter().all(|&target| target == 150.0));

    rig.controller.shutdown().await?;
    let contents = fs::read_to_string(&trace_path)?;
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some(TRACE_HEADER));
    assert_eq!(lines.count(), ticks);
    Ok(())
}

#[tokio::test]
async fn test_exit_runs_shutdown_path() -> Result<()> {
    let mut rig = Rig::new(ProcessRecorder::new(100));
    let handle = rig.controller.handle();
    handle.set_target(200.0)?;
    for _ in 0..20 {
        rig.step().await;
    }
    assert!(rig.furnace.applied_voltage() > 0.0);

    handle.request_exit()?;
    assert_eq!(rig.step().await, TickOutcome::Exit);
    rig.controller.shutdown().await?;
    assert_eq!(rig.furnace.applied_voltage(), 0.0);
    assert_eq!(rig.controller.session().voltage, 0.0);
    Ok(())
}
