//! Measure one configuration point, retrying until the workload produces usable numbers.
//!
//! Each attempt starts from a clean slate: kill anything left over from the previous attempt,
//! restart the coordination service, run the workload and reduce its output. Any failure along
//! the way (a timeout, a non-zero exit, a log with no throughput in it) is logged and the whole
//! attempt is repeated, up to the limit of the `RetryPolicy`.

use std::fmt;
use std::time::Duration;

use console::style;

use log::{error, info, warn};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use serde::{Deserialize, Serialize};

use crate::command::{ExecMode, RemoteCommand};
use crate::executor::{CommandExecutor, ExecError, Latencies};
use crate::stats::{self, CacheStats, EpochMetrics, ExtractError, Mode, ScalarLine};

/// The largest random fraction added to a backoff delay.
const MAX_JITTER: f64 = 0.25;

/// How often and how patiently to retry a point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: Some(5),
            initial_backoff_secs: 5.0,
            max_backoff_secs: 120.0,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Never give up on a point.
    pub fn forever(self) -> Self {
        RetryPolicy {
            max_attempts: None,
            ..self
        }
    }

    /// Whether another attempt may follow the given number of failed attempts.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed_attempts < max)
    }

    /// The delay after the `failed_attempts`-th failure, before jitter.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(64) as i32;
        let secs = (self.initial_backoff_secs * self.multiplier.powi(exp))
            .min(self.max_backoff_secs)
            .max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// `backoff` plus up to 25% random jitter.
    pub fn delay<R: Rng>(&self, failed_attempts: u32, rng: &mut R) -> Duration {
        let base = self.backoff(failed_attempts);
        base.mul_f64(1.0 + rng.gen_range(0.0..=MAX_JITTER))
    }
}

/// Everything needed to measure one point.
#[derive(Clone, Debug)]
pub struct Trial {
    /// A short description of the point for progress output, e.g. `method=CHIME zipfian=0.99`.
    pub label: String,

    /// Kills leftover workload processes wherever the workload runs. Should allow errors.
    pub kill: RemoteCommand,
    /// Restarts the coordination service on the control node. Single-node tests have none.
    pub reset: Option<RemoteCommand>,
    pub workload: RemoteCommand,
    pub node_count: usize,

    /// Use the long deadline for a workload that runs on the workers.
    pub long_running: bool,
    pub only_throughput: bool,

    pub target_epoch: u64,
    pub mode: Mode,
    /// Reduce the output to this one number instead of epoch statistics.
    pub scalar: Option<ScalarLine>,

    /// Also collect memory consumption.
    pub cache_stats: bool,
    /// Also read latency histograms from this directory on every worker.
    pub latency_dir: Option<String>,
}

/// The results of one successful attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointMetrics {
    /// All zeros for single-number tests.
    pub epoch: EpochMetrics,
    pub latency: Option<Latencies>,
    pub cache: Option<CacheStats>,
    #[serde(default)]
    pub scalar: Option<f64>,
}

impl PointMetrics {
    fn scalar(value: f64) -> Self {
        PointMetrics {
            epoch: EpochMetrics::default(),
            latency: None,
            cache: None,
            scalar: Some(value),
        }
    }
}

impl fmt::Display for PointMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.scalar {
            return write!(f, "value={}", value);
        }
        write!(f, "tpt={}", self.epoch.throughput)?;
        if let Some(lat) = &self.latency {
            write!(f, " p50_lat={} p99_lat={}", lat.p50, lat.p99)?;
        }
        if let Some(cache) = &self.cache {
            write!(
                f,
                " cache={}MB hotspot_buffer={}MB",
                cache.consumed_cache_mb, cache.consumed_hotspot_buffer_mb
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PointOutcome {
    Measured { metrics: PointMetrics, attempts: u32 },
    /// The retry budget ran out. The point has no numbers.
    Exhausted { attempts: u32, last_error: String },
}

impl PointOutcome {
    pub fn metrics(&self) -> Option<&PointMetrics> {
        match self {
            PointOutcome::Measured { metrics, .. } => Some(metrics),
            PointOutcome::Exhausted { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PointOutcome::Measured { attempts, .. } | PointOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Why an attempt failed. Execution failures and unusable logs are reported differently, but
/// both lead to another attempt.
#[derive(Debug)]
enum AttemptError {
    Exec(ExecError),
    Extract(ExtractError),
}

impl From<ExecError> for AttemptError {
    fn from(err: ExecError) -> Self {
        AttemptError::Exec(err)
    }
}

impl From<ExtractError> for AttemptError {
    fn from(err: ExtractError) -> Self {
        AttemptError::Extract(err)
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Exec(err) => write!(f, "{}", err),
            AttemptError::Extract(err) => write!(f, "{}", err),
        }
    }
}

pub struct MeasurementLoop<'e, E: CommandExecutor> {
    executor: &'e E,
    policy: RetryPolicy,
}

impl<'e, E: CommandExecutor> MeasurementLoop<'e, E> {
    pub fn new(executor: &'e E, policy: RetryPolicy) -> Self {
        MeasurementLoop { executor, policy }
    }

    /// Measure `trial`, retrying according to the policy. Running out of attempts is an outcome,
    /// not an error. Only errors that no retry can fix (the trial asks for more nodes than the
    /// cluster has) are returned, without a second attempt.
    pub fn measure(&self, trial: &Trial) -> Result<PointOutcome, ExecError> {
        let mut rng = SmallRng::from_entropy();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match self.attempt(trial) {
                Ok(metrics) => {
                    println!(
                        "{}",
                        style(format!("[FINISHED POINT] {} {}", trial.label, metrics)).green()
                    );
                    return Ok(PointOutcome::Measured { metrics, attempts });
                }
                Err(AttemptError::Exec(err)) if err.is_permanent() => {
                    error!("Cannot measure {}: {}", trial.label, err);
                    return Err(err);
                }
                Err(err) => err,
            };

            match &err {
                AttemptError::Exec(err) => warn!("Error! Retry... {} ({})", err, trial.label),
                AttemptError::Extract(err) => {
                    warn!("No usable statistics, retry... {} ({})", err, trial.label)
                }
            }

            if !self.policy.allows_retry(attempts) {
                error!(
                    "Giving up on {} after {} attempts: {}",
                    trial.label, attempts, err
                );
                return Ok(PointOutcome::Exhausted {
                    attempts,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.delay(attempts, &mut rng);
            if delay > Duration::from_secs(0) {
                info!("Waiting {:?} before attempt {}", delay, attempts + 1);
                std::thread::sleep(delay);
            }
        }
    }

    fn attempt(&self, trial: &Trial) -> Result<PointMetrics, AttemptError> {
        self.executor.dispatch(&trial.kill, trial.node_count)?;
        if let Some(reset) = &trial.reset {
            self.executor.execute_one(reset)?;
        }

        let logs = if trial.long_running && trial.workload.mode() == ExecMode::All {
            self.executor
                .execute_all_long(&trial.workload, trial.node_count, trial.only_throughput)?
        } else {
            self.executor.dispatch(&trial.workload, trial.node_count)?
        };

        if let Some(line) = &trial.scalar {
            return Ok(PointMetrics::scalar(stats::extract_scalar(&logs, line)?));
        }

        let epoch = stats::extract(&logs, trial.target_epoch, trial.mode)?;

        let cache = if trial.cache_stats {
            Some(stats::cache_statistics(&logs))
        } else {
            None
        };

        let latency = match &trial.latency_dir {
            Some(dir) => Some(self.executor.read_cluster_latencies(
                dir,
                trial.node_count,
                trial.target_epoch,
                trial.mode == Mode::Windowed,
            )?),
            None => None,
        };

        Ok(PointMetrics {
            epoch,
            latency,
            cache,
            scalar: None,
        })
    }
}
