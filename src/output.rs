//! Result artifacts: the per-experiment JSON record and the execution-time log.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{offset::Local, DateTime};

use failure::ResultExt;

use serde::{Deserialize, Serialize};

use crate::measure::PointMetrics;

/// When a record was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Local>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Local::now())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d-%H-%M-%S"))
    }
}

/// The quantities an experiment can record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Throughput,
    P50Latency,
    P99Latency,
    CacheHitRate,
    LockFailCount,
    InvalidLeafRate,
    SpeculativeRatio,
    SpeculativeAccuracy,
    LoadFactor,
    ConsumedCacheSize,
    ConsumedHotspotBufferSize,
    BufferHitRatio,
    /// The single number printed by a scalar test.
    Value,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::Throughput => "throughput",
            Metric::P50Latency => "p50_latency",
            Metric::P99Latency => "p99_latency",
            Metric::CacheHitRate => "cache_hit_rate",
            Metric::LockFailCount => "lock_fail_count",
            Metric::InvalidLeafRate => "invalid_leaf_rate",
            Metric::SpeculativeRatio => "speculative_ratio",
            Metric::SpeculativeAccuracy => "speculative_accuracy",
            Metric::LoadFactor => "load_factor",
            Metric::ConsumedCacheSize => "consumed_cache_size",
            Metric::ConsumedHotspotBufferSize => "consumed_hotspot_buffer_size",
            Metric::BufferHitRatio => "buffer_hit_ratio",
            Metric::Value => "value",
        }
    }

    pub fn needs_latency(self) -> bool {
        match self {
            Metric::P50Latency | Metric::P99Latency => true,
            _ => false,
        }
    }

    pub fn needs_cache_stats(self) -> bool {
        match self {
            Metric::ConsumedCacheSize | Metric::ConsumedHotspotBufferSize => true,
            _ => false,
        }
    }

    /// The value of this metric, if it was measured.
    pub fn value(self, metrics: &PointMetrics) -> Option<f64> {
        let epoch = &metrics.epoch;
        match self {
            Metric::Throughput => Some(epoch.throughput),
            Metric::P50Latency => metrics.latency.map(|l| l.p50),
            Metric::P99Latency => metrics.latency.map(|l| l.p99),
            Metric::CacheHitRate => Some(epoch.cache_hit_rate),
            Metric::LockFailCount => Some(epoch.lock_fail_count),
            Metric::InvalidLeafRate => Some(epoch.invalid_leaf_rate),
            Metric::SpeculativeRatio => Some(epoch.speculative_ratio),
            Metric::SpeculativeAccuracy => Some(epoch.speculative_accuracy),
            Metric::LoadFactor => Some(epoch.load_factor),
            Metric::ConsumedCacheSize => metrics.cache.map(|c| c.consumed_cache_mb),
            Metric::ConsumedHotspotBufferSize => {
                metrics.cache.map(|c| c.consumed_hotspot_buffer_mb)
            }
            Metric::BufferHitRatio => Some(epoch.buffer_hit_ratio()),
            Metric::Value => metrics.scalar,
        }
    }
}

/// A point on the X axis: a number, or a label such as a workload name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XValue {
    Number(f64),
    Label(String),
}

impl fmt::Display for XValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XValue::Number(n) => write!(f, "{}", n),
            XValue::Label(l) => write!(f, "{}", l),
        }
    }
}

/// One measured (or abandoned) point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    pub method: String,
    pub x: XValue,
    /// The parameters the point was run with.
    pub params: BTreeMap<String, String>,
    /// `None` if the point ran out of attempts.
    pub metrics: Option<PointMetrics>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Everything an experiment produced, written to `fig_<name>.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub methods: Vec<String>,
    pub x_label: String,
    #[serde(rename = "X_data")]
    pub x_data: Vec<XValue>,
    /// The primary metric of each method, in the order of `x_data`. Unmeasured and skipped
    /// points are null.
    #[serde(rename = "Y_data")]
    pub y_data: BTreeMap<String, Vec<Option<f64>>>,
    /// The remaining metrics, by metric and then method.
    #[serde(rename = "BACKUP_data")]
    pub backup_data: BTreeMap<String, BTreeMap<String, Vec<Option<f64>>>>,
    pub points: Vec<MeasurementPoint>,

    pub local_git_hash: String,
    pub timestamp: Timestamp,
}

impl ResultRecord {
    pub fn new(name: &str, methods: Vec<String>, x_label: &str, x_data: Vec<XValue>) -> Self {
        ResultRecord {
            name: name.to_owned(),
            y_data: methods
                .iter()
                .map(|m| (m.clone(), vec![None; x_data.len()]))
                .collect(),
            methods,
            x_label: x_label.to_owned(),
            x_data,
            backup_data: BTreeMap::new(),
            points: vec![],
            local_git_hash: String::new(),
            timestamp: Timestamp::now(),
        }
    }

    /// Add a point, recording `metrics[0]` in `y_data` and the rest in `backup_data`, at the
    /// index of `point.x`. An `x` not yet in `x_data` is appended. Every series stays as long as
    /// `x_data`.
    pub fn push(&mut self, point: MeasurementPoint, metrics: &[Metric]) {
        let index = match self.x_data.iter().position(|x| *x == point.x) {
            Some(index) => index,
            None => {
                self.x_data.push(point.x.clone());
                self.x_data.len() - 1
            }
        };
        let value = |metric: Metric| point.metrics.as_ref().and_then(|m| metric.value(m));

        if let Some((primary, rest)) = metrics.split_first() {
            set_at(
                self.y_data.entry(point.method.clone()).or_default(),
                index,
                value(*primary),
            );

            for metric in rest {
                set_at(
                    self.backup_data
                        .entry(metric.name().to_owned())
                        .or_default()
                        .entry(point.method.clone())
                        .or_default(),
                    index,
                    value(*metric),
                );
            }
        }

        let width = self.x_data.len();
        for series in self
            .y_data
            .values_mut()
            .chain(self.backup_data.values_mut().flat_map(BTreeMap::values_mut))
        {
            series.resize(width, None);
        }

        self.points.push(point);
    }

    /// Points that ran out of attempts.
    pub fn failed_points(&self) -> impl Iterator<Item = &MeasurementPoint> {
        self.points.iter().filter(|p| p.metrics.is_none())
    }

    /// Write the record to `<dir>/fig_<name>.json`, creating `dir` if needed.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, failure::Error> {
        std::fs::create_dir_all(dir)
            .with_context(|_| format!("unable to create {}", dir.display()))?;

        let path = dir.join(format!("fig_{}.json", self.name));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|_| format!("unable to write {}", path.display()))?;

        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, failure::Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|_| format!("unable to read {}", path.display()))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn set_at(series: &mut Vec<Option<f64>>, index: usize, value: Option<f64>) {
    if series.len() <= index {
        series.resize(index + 1, None);
    }
    series[index] = value;
}

/// Append `fig_<name> execution time: <m> min <s> s` to `<dir>/time.log`.
pub fn append_time_log(dir: &Path, name: &str, elapsed: Duration) -> Result<(), failure::Error> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("time.log");
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|_| format!("unable to open {}", path.display()))?;

    let secs = elapsed.as_secs();
    writeln!(
        f,
        "fig_{} execution time: {} min {} s",
        name,
        secs / 60,
        secs % 60
    )?;

    Ok(())
}

/// Given an array of timings, generate a human-readable string.
pub fn timings_str(timings: &[(&str, Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}

/// The git hash of the working directory, or "dirty" if there are uncommitted changes.
pub fn local_git_hash() -> Result<String, failure::Error> {
    let is_dirty = std::process::Command::new("git")
        .args(&["diff", "--quiet"])
        .status()?
        .code()
        == Some(1);

    if is_dirty {
        return Ok("dirty".into());
    }

    let output = std::process::Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()?;
    let output =
        std::str::from_utf8(&output.stdout).context("converting git hash string to UTF-8")?;
    Ok(output.trim().into())
}
