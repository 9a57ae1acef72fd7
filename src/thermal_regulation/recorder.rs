// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-annealer project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Process recorder
//!
//! The recorder keeps the process trace as four parallel series (elapsed
//! time, temperature, voltage, target) for live display and end-of-session
//! export. Memory is bounded by a capacity ceiling: when it is reached the
//! oldest half of the trace is discarded in one go. This is a lossy
//! compaction, not a sliding window: long runs keep full resolution for the
//! recent half and lose the early history.
//!
//! Every sample is also appended to a CSV trace log and flushed immediately,
//! so a crash or forced termination loses at most the in-memory tail, never
//! the session. The CSV columns are:
//!
//! ```text
//! elapsed_minutes,temperature_C,voltage_V,target_temperature_C
//! ```
//!
//! An unset target is written as `NaN`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// CSV header line of the trace log
pub const TRACE_HEADER: &str = "elapsed_minutes,temperature_C,voltage_V,target_temperature_C";

/// One process observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Minutes since the session started
    pub elapsed_minutes: f64,
    /// Measured temperature in degrees Celsius
    pub temperature_celsius: f64,
    /// Commanded supply voltage
    pub voltage: f64,
    /// Active target in degrees Celsius, NaN when unset
    #[serde(deserialize_with = "nan_if_null")]
    pub target_celsius: f64,
}

/// JSON has no NaN: serde_json writes it as `null`, read it back as NaN
fn nan_if_null<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Append-only CSV sink, flushed on every record
pub struct TraceLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl TraceLog {
    /// Open (or create) the trace log in append mode.
    ///
    /// The header is only written when the file is empty, so an existing
    /// trace is never truncated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open trace log at {:?}", path))?;
        let is_empty = file
            .metadata()
            .with_context(|| format!("Failed to stat trace log at {:?}", path))?
            .len()
            == 0;

        let mut writer = BufWriter::new(file);
        if is_empty {
            writeln!(writer, "{}", TRACE_HEADER)
                .and_then(|_| writer.flush())
                .with_context(|| format!("Failed to write trace header to {:?}", path))?;
        }
        info!("Recording process trace to {:?}", path);

        Ok(Self {
            path,
            writer: Some(writer),
        })
    }

    /// Write one record and flush it to the file
    pub fn append(&mut self, sample: &Sample) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Trace log {:?} is closed", self.path))?;
        writeln!(
            writer,
            "{},{},{},{}",
            sample.elapsed_minutes, sample.temperature_celsius, sample.voltage, sample.target_celsius
        )
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to append to trace log {:?}", self.path))
    }

    /// Flush, sync and close the file. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush trace log {:?}", self.path))?;
            writer
                .get_ref()
                .sync_all()
                .with_context(|| format!("Failed to sync trace log {:?}", self.path))?;
            debug!("Trace log {:?} closed", self.path);
        }
        Ok(())
    }
}

impl Drop for TraceLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing trace log: {}", e);
        }
    }
}

/// Exported trace artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceExport {
    /// Wall-clock time the session started
    pub started_at: DateTime<Utc>,
    /// Wall-clock time of the export
    pub exported_at: DateTime<Utc>,
    /// Capacity ceiling in effect
    pub capacity: usize,
    /// Number of samples discarded by compaction
    pub dropped_samples: usize,
    /// Retained samples in time order
    pub samples: Vec<Sample>,
}

/// Bounded in-memory process trace with a durable log sink
pub struct ProcessRecorder {
    capacity: usize,
    times: Vec<f64>,
    temperatures: Vec<f64>,
    voltages: Vec<f64>,
    targets: Vec<f64>,
    sink: Option<TraceLog>,
    dropped: usize,
    started_at: DateTime<Utc>,
}

impl ProcessRecorder {
    /// Recorder without a log sink
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            times: Vec::with_capacity(capacity),
            temperatures: Vec::with_capacity(capacity),
            voltages: Vec::with_capacity(capacity),
            targets: Vec::with_capacity(capacity),
            sink: None,
            dropped: 0,
            started_at: Utc::now(),
        }
    }

    /// Recorder that also appends every sample to a CSV trace log
    pub fn with_trace_log<P: AsRef<Path>>(capacity: usize, path: P) -> Result<Self> {
        let mut recorder = Self::new(capacity);
        recorder.sink = Some(TraceLog::open(path)?);
        Ok(recorder)
    }

    /// Record one sample.
    ///
    /// The sample is written to the log sink first; if that fails the
    /// in-memory trace is left untouched and the error is returned.
    pub fn append(&mut self, sample: Sample) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.append(&sample)?;
        }
        self.times.push(sample.elapsed_minutes);
        self.temperatures.push(sample.temperature_celsius);
        self.voltages.push(sample.voltage);
        self.targets.push(sample.target_celsius);
        self.truncate_if_over_capacity();
        Ok(())
    }

    /// Drop the oldest half once the ceiling is reached.
    ///
    /// Returns `true` when a compaction happened.
    pub fn truncate_if_over_capacity(&mut self) -> bool {
        let len = self.times.len();
        if len < self.capacity {
            return false;
        }
        let keep = self.capacity / 2;
        let drop_count = len - keep;
        for series in [
            &mut self.times,
            &mut self.temperatures,
            &mut self.voltages,
            &mut self.targets,
        ] {
            series.drain(..drop_count);
        }
        self.dropped += drop_count;
        warn!(
            "Recorder reached its capacity of {} samples, discarded the oldest {} ({} discarded in total)",
            self.capacity, drop_count, self.dropped
        );
        true
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples discarded by compaction so far
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    fn sample_at(&self, index: usize) -> Sample {
        Sample {
            elapsed_minutes: self.times[index],
            temperature_celsius: self.temperatures[index],
            voltage: self.voltages[index],
            target_celsius: self.targets[index],
        }
    }

    /// Most recent sample
    pub fn last(&self) -> Option<Sample> {
        self.len().checked_sub(1).map(|i| self.sample_at(i))
    }

    /// Retained samples in time order
    pub fn export(&self) -> Vec<Sample> {
        (0..self.len()).map(|i| self.sample_at(i)).collect()
    }

    /// Retained trace as an N×4 matrix (time, temperature, voltage, target)
    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.len(), 4), |(row, col)| match col {
            0 => self.times[row],
            1 => self.temperatures[row],
            2 => self.voltages[row],
            _ => self.targets[row],
        })
    }

    /// Write the retained trace as a JSON document
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let export = TraceExport {
            started_at: self.started_at,
            exported_at: Utc::now(),
            capacity: self.capacity,
            dropped_samples: self.dropped,
            samples: self.export(),
        };
        let file = File::create(path)
            .with_context(|| format!("Failed to create trace export at {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &export)
            .with_context(|| format!("Failed to serialize trace export to {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write trace export to {:?}", path))?;
        info!(
            "Exported {} samples to {:?} ({} discarded by compaction)",
            export.samples.len(),
            path,
            export.dropped_samples
        );
        Ok(())
    }

    /// Flush and close the trace log. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}
