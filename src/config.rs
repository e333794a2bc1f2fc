//! Parameter files.
//!
//! A campaign reads two JSON files from the parameter directory: `common.json`, describing the
//! cluster and the projects, and `fig_<name>.json`, describing one experiment. For example:
//!
//! ```json
//! {
//!     "methods": ["CHIME", "Sherman", "SMART"],
//!     "workload": {
//!         "binary": "ycsb_test",
//!         "command": "./ycsb_test {cn_num} {client_num_per_cn} 2 {key_type} {workload}",
//!         "split": "python3 {ycsb_dir}/split_workload.py {workload} {key_type} {cn_num} {client_num_per_cn}",
//!         "name": "a"
//!     },
//!     "sweep": { "variable": "client_num", "values": [[1, 8], [2, 16]] },
//!     "target_epoch": 10,
//!     "MN_num": 1,
//!     "value_size": 8,
//!     "cache_size": 100,
//!     "span_size": { "CHIME": 64, "Sherman": 64 },
//!     "neighbor_size": 8,
//!     "hotspot_buffer_size": 30
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use failure::{Fail, ResultExt};

use serde::{Deserialize, Serialize};

use crate::command::ExecMode;
use crate::executor::Timeouts;
use crate::measure::RetryPolicy;
use crate::method::Method;
use crate::output::Metric;
use crate::stats::ScalarLine;

/// Errors in the parameters of an experiment. These are never retried.
#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "{} requires parameter `{}`", method, parameter)]
    MissingParameter {
        method: String,
        parameter: &'static str,
    },

    #[fail(display = "unknown placeholder {{{}}} in `{}`", name, template)]
    UnknownPlaceholder { template: String, name: String },

    #[fail(display = "invalid parameters: {}", reason)]
    Invalid { reason: String },
}

fn default_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".into())
}

fn default_reset() -> String {
    "cd {work_dir} && /bin/bash ../script/restartMemc.sh".into()
}

fn default_kill() -> String {
    "cd {work_dir} && killall -9 {binary}".into()
}

fn default_latency_dir() -> String {
    "{project_dir}/us_lat".into()
}

/// Cluster- and project-wide parameters (`common.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommonParams {
    /// The directory holding one checkout per project (`CHIME`, `SMART`, ...).
    pub home_dir: String,
    pub workloads_dir: String,
    pub cluster_ips: Vec<String>,
    pub master_ip: String,

    #[serde(default = "default_username")]
    pub username: String,
    /// Defaults to `~/.ssh/id_rsa`.
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,

    #[serde(default)]
    pub common_options: String,
    /// Per-method cmake options, looked up by full label, then base label.
    #[serde(default)]
    pub cmake_options: HashMap<String, String>,

    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Restarts the coordination service. Runs on the master node.
    #[serde(default = "default_reset")]
    pub reset: String,
    /// Kills the workload. Runs on the participating workers.
    #[serde(default = "default_kill")]
    pub kill: String,
}

impl CommonParams {
    /// The directory containing the workload directory.
    pub fn ycsb_dir(&self) -> String {
        Path::new(&self.workloads_dir)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

fn yes() -> bool {
    true
}

/// The benchmark program and how to run it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadParams {
    /// The executable in the build directory. Also what gets killed between attempts.
    pub binary: String,
    /// Run from the build directory.
    pub command: String,
    /// Splits the workload between the compute nodes. Rerun whenever it changes.
    #[serde(default)]
    pub split: Option<String>,
    /// The workload name (`a`, `c`, `la`, ...), unless it is swept.
    #[serde(default)]
    pub name: Option<String>,

    /// `one` builds and runs everything on the control node only.
    #[serde(default)]
    pub mode: ExecMode,
    /// The test prints a single number on its first line instead of per-epoch statistics.
    #[serde(default)]
    pub scalar: Option<ScalarLine>,

    #[serde(default = "yes")]
    pub long_running: bool,
    #[serde(default)]
    pub only_throughput: bool,
    #[serde(default = "default_latency_dir")]
    pub latency_dir: String,
}

/// The variable an experiment sweeps, and its values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variable", content = "values", rename_all = "snake_case")]
pub enum Sweep {
    /// `(compute nodes, clients per compute node)`.
    ClientNum(Vec<(usize, usize)>),
    Zipfian(Vec<f64>),
    KeySize(Vec<u64>),
    NeighborSize(Vec<u64>),
    HotspotBufferSize(Vec<u64>),
    CacheSize(Vec<u64>),
    SpanSize(Vec<u64>),
    Workload(Vec<String>),
    /// Amplification factor of the hash table tests. Only a command parameter.
    AmplSize(Vec<u64>),
}

impl Sweep {
    pub fn variable(&self) -> &'static str {
        match self {
            Sweep::ClientNum(_) => "client_num",
            Sweep::Zipfian(_) => "zipfian",
            Sweep::KeySize(_) => "key_size",
            Sweep::NeighborSize(_) => "neighbor_size",
            Sweep::HotspotBufferSize(_) => "hotspot_buffer_size",
            Sweep::CacheSize(_) => "cache_size",
            Sweep::SpanSize(_) => "span_size",
            Sweep::Workload(_) => "workload",
            Sweep::AmplSize(_) => "ampl_size",
        }
    }

    /// The `i`-th value as written in `overrides` keys: `2x16` for client numbers, the value
    /// itself otherwise.
    pub fn key(&self, i: usize) -> String {
        match self {
            Sweep::ClientNum(v) => format!("{}x{}", v[i].0, v[i].1),
            Sweep::Zipfian(v) => v[i].to_string(),
            Sweep::KeySize(v)
            | Sweep::NeighborSize(v)
            | Sweep::HotspotBufferSize(v)
            | Sweep::CacheSize(v)
            | Sweep::SpanSize(v)
            | Sweep::AmplSize(v) => v[i].to_string(),
            Sweep::Workload(v) => v[i].clone(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.len()).map(move |i| self.key(i))
    }

    pub fn len(&self) -> usize {
        match self {
            Sweep::ClientNum(v) => v.len(),
            Sweep::Zipfian(v) => v.len(),
            Sweep::KeySize(v)
            | Sweep::NeighborSize(v)
            | Sweep::HotspotBufferSize(v)
            | Sweep::CacheSize(v)
            | Sweep::SpanSize(v)
            | Sweep::AmplSize(v) => v.len(),
            Sweep::Workload(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adjustments for one value of the sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointOverride {
    pub target_epoch: Option<u64>,
    /// Applied after the experiment's own `cmake_replace`.
    pub cmake_replace: Vec<(String, String)>,
    /// Methods that do not run at this value.
    pub skip_methods: Vec<Method>,
}

/// One experiment (`fig_<name>.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentParams {
    pub methods: Vec<Method>,
    pub workload: WorkloadParams,
    pub sweep: Sweep,
    /// Per method label: different values of the same variable.
    #[serde(default)]
    pub method_sweep: HashMap<String, Sweep>,
    /// Per sweep value, keyed by `Sweep::key`.
    #[serde(default)]
    pub overrides: BTreeMap<String, PointOverride>,

    pub target_epoch: u64,
    /// Average over the window ending at `target_epoch` instead of taking that epoch alone.
    #[serde(default)]
    pub averaged: bool,

    /// `(compute nodes, clients per compute node)`, unless swept. Not needed for single-node
    /// tests.
    #[serde(default)]
    pub client_num: Option<(usize, usize)>,
    #[serde(rename = "MN_num")]
    pub mn_num: u64,

    /// `randint` keys are 8 bytes; anything else is 32 bytes unless `key_size` says otherwise.
    #[serde(default = "default_key_type")]
    pub key_type: String,
    #[serde(default)]
    pub key_size: Option<u64>,
    pub value_size: u64,
    pub cache_size: u64,

    /// Per method label.
    #[serde(default)]
    pub span_size: HashMap<String, u64>,
    #[serde(default)]
    pub epsilon: Option<u64>,
    #[serde(default)]
    pub neighbor_size: Option<u64>,
    #[serde(default)]
    pub hotspot_buffer_size: Option<u64>,
    #[serde(default, rename = "greedy_IO_size")]
    pub greedy_io_size: Option<u64>,
    #[serde(default)]
    pub zipfian: Option<f64>,

    /// `(from, to)` substitutions applied to the cmake options of every build.
    #[serde(default)]
    pub cmake_replace: Vec<(String, String)>,

    /// What to record. The first metric is the primary one.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,

    /// Extra template variables.
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
}

fn default_key_type() -> String {
    "randint".into()
}

fn default_metrics() -> Vec<Metric> {
    vec![Metric::Throughput]
}

impl ExperimentParams {
    /// Check what can be checked without a method or sweep value at hand.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };

        if self.methods.is_empty() {
            return invalid("no methods");
        }
        if self.sweep.is_empty() {
            return invalid("the sweep has no values");
        }
        if self.metrics.is_empty() {
            return invalid("no metrics");
        }

        let on_cluster = self.workload.mode == ExecMode::All;
        if on_cluster && self.client_num.is_none() && !matches!(self.sweep, Sweep::ClientNum(_)) {
            return invalid("`client_num` is required unless it is swept");
        }
        if on_cluster && self.workload.name.is_none() && !matches!(self.sweep, Sweep::Workload(_))
        {
            return invalid("`workload.name` is required unless it is swept");
        }
        if !on_cluster && self.workload.split.is_some() {
            return invalid("single-node tests cannot split a workload");
        }

        let wants_value = self.metrics.iter().any(|m| *m == Metric::Value);
        let only_value = self.metrics.iter().all(|m| *m == Metric::Value);
        match (&self.workload.scalar, wants_value, only_value) {
            (Some(_), _, false) => return invalid("a scalar test can only record `value`"),
            (None, true, _) => return invalid("`value` needs `workload.scalar`"),
            _ => {}
        }

        for (label, sweep) in self.method_sweep.iter() {
            if sweep.variable() != self.sweep.variable() {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "`method_sweep` for {} sweeps {}, not {}",
                        label,
                        sweep.variable(),
                        self.sweep.variable()
                    ),
                });
            }
            if sweep.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("`method_sweep` for {} has no values", label),
                });
            }
        }

        for (key, over) in self.overrides.iter() {
            let known = self.sweep.keys().any(|k| k == *key)
                || self.method_sweep.values().any(|s| s.keys().any(|k| k == *key));
            if !known {
                return Err(ConfigError::Invalid {
                    reason: format!("override for {:?}, which is not swept", key),
                });
            }
            if let Some(method) = over.skip_methods.iter().find(|m| !self.methods.contains(m)) {
                return Err(ConfigError::Invalid {
                    reason: format!("override for {:?} skips {}, which is not run", key, method),
                });
            }
        }

        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, failure::Error> {
    let contents = std::fs::read_to_string(path)
        .with_context(|_| format!("unable to read {}", path.display()))?;
    Ok(serde_json::from_str(&contents)
        .with_context(|_| format!("unable to parse {}", path.display()))?)
}

/// Load `common.json` and `fig_<name>.json` from `params_dir`.
pub fn load(
    params_dir: &Path,
    name: &str,
) -> Result<(CommonParams, ExperimentParams), failure::Error> {
    let common: CommonParams = read_json(&params_dir.join("common.json"))?;
    let exp: ExperimentParams = read_json(&params_dir.join(format!("fig_{}.json", name)))?;

    if common.cluster_ips.is_empty() {
        return Err(ConfigError::Invalid {
            reason: "`cluster_ips` is empty".into(),
        }
        .into());
    }
    exp.validate()?;

    Ok((common, exp))
}
