// GuardBand - Host Replay Tool
//
// Feeds a recorded session through the monitoring pipeline exactly as the
// sensor task would, with an in-memory telemetry store standing in for the
// remote one.  Input CSV (header row required):
//
//   t_ms,ax,ay,az[,gx,gy,gz]      raw MPU6050 register values

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, ensure, Context, Result};
use csv::ReaderBuilder;

use crate::config::*;
use crate::events::{AlertEvent, RawImuReading};
use crate::monitor::{Monitor, MonitorConfig};
use crate::persist::DailyCounters;
use crate::step::StepPolicy;
use crate::telemetry::{MemoryStore, TelemetryWorker};

const USAGE: &str = "usage: guardband [--filter] [--dual-threshold] <session.csv>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    pub path: PathBuf,
    /// Kalman smoothing on.
    pub filter: bool,
    /// Peak-then-trough step policy instead of the stance band.
    pub dual_threshold: bool,
}

impl ReplayOptions {
    fn monitor_config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.conditioner.filtering_enabled = self.filter;
        if self.dual_threshold {
            config.step.policy = StepPolicy::DualThreshold;
        }
        config
    }
}

pub fn parse_args<I>(args: I) -> Result<ReplayOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut filter = false;
    let mut dual_threshold = false;
    let mut path: Option<PathBuf> = None;

    for arg in args {
        match arg.as_str() {
            "--filter" => filter = true,
            "--dual-threshold" => dual_threshold = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ => {
                if path.is_some() {
                    bail!(USAGE);
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| anyhow!(USAGE))?;
    Ok(ReplayOptions {
        path,
        filter,
        dual_threshold,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRow {
    pub t_ms: u32,
    pub reading: RawImuReading,
}

fn field<T: std::str::FromStr>(record: &csv::StringRecord, idx: usize, row: usize) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    record[idx]
        .trim()
        .parse()
        .with_context(|| format!("column {} invalid on row {}", idx + 1, row))
}

pub fn load_rows<R: Read>(input: R) -> Result<Vec<ReplayRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let record = result.with_context(|| format!("row {} unreadable", row))?;
        let gyro = match record.len() {
            4 => None,
            7 => Some([field(&record, 4, row)?, field(&record, 5, row)?, field(&record, 6, row)?]),
            n => bail!("row {} has {} columns, expected 4 or 7", row, n),
        };
        rows.push(ReplayRow {
            t_ms: field(&record, 0, row)?,
            reading: RawImuReading {
                accel: [field(&record, 1, row)?, field(&record, 2, row)?, field(&record, 3, row)?],
                gyro,
            },
        });
    }

    ensure!(!rows.is_empty(), "session contains no samples");
    Ok(rows)
}

pub fn load_rows_from_path(path: &Path) -> Result<Vec<ReplayRow>> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {:?}", path))?;
    load_rows(file)
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub samples: usize,
    pub alerts: Vec<AlertEvent>,
    pub daily: DailyCounters,
    pub cadence_spm: Option<f32>,
    pub remote_writes: usize,
}

pub fn replay(rows: &[ReplayRow], options: &ReplayOptions) -> Result<ReplaySummary> {
    let mut monitor = Monitor::new(options.monitor_config(), DailyCounters::default())?;
    let mut telemetry = TelemetryWorker::new(MemoryStore::default(), "replay");
    let mut summary = ReplaySummary::default();

    for row in rows {
        let report = monitor.tick(&row.reading, row.t_ms);
        summary.alerts.extend(report.alerts.iter().copied());
        for update in report.telemetry {
            telemetry.handle(update);
        }
        for command in telemetry.service(row.t_ms) {
            monitor.apply_command(command, row.t_ms);
        }
    }
    // Final flush of whatever the last cycle left pending.
    if let Some(last) = rows.last() {
        telemetry.service(last.t_ms.wrapping_add(TELEMETRY_INTERVAL_MS));
    }

    summary.samples = rows.len();
    summary.daily = monitor.daily();
    summary.cadence_spm = monitor.screen_state().cadence_spm;
    summary.remote_writes = telemetry.sink().writes.len();
    Ok(summary)
}

pub fn run() -> Result<()> {
    env_logger::init();
    let options = parse_args(env::args().skip(1))?;
    let rows = load_rows_from_path(&options.path)?;
    log::info!("Replaying {} samples from {:?}", rows.len(), options.path);

    let summary = replay(&rows, &options)?;
    for alert in &summary.alerts {
        println!(
            "{:>9} ms  {:<9} severity {:.2}",
            alert.timestamp_ms,
            alert.kind.display_name(),
            alert.severity
        );
    }
    println!("samples        {}", summary.samples);
    println!("steps          {}", summary.daily.steps);
    println!("active minutes {}", summary.daily.active_minutes);
    match summary.cadence_spm {
        Some(cadence) => println!("cadence        {:.0} steps/min", cadence),
        None => println!("cadence        -"),
    }
    println!("remote writes  {}", summary.remote_writes);
    Ok(())
}
