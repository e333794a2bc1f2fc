//! Turn the raw output of a workload run into numbers.
//!
//! The output of one run is a `LogBundle`: the stdout of every worker node, in rank order. Only
//! some nodes print the cluster-wide statistics (usually just the first one), so `extract` tries
//! each node in turn and takes the first that has a usable throughput.

pub mod cache;
pub mod epoch;
pub mod event;
pub mod scalar;

use std::iter::FromIterator;

use failure::Fail;

use serde::{Deserialize, Serialize};

pub use self::cache::{cache_statistics, CacheStats};
pub use self::epoch::{extract_node, window_epochs, window_start, Mode};
pub use self::scalar::{extract_scalar, ScalarLine};

use self::event::MetricField;

/// The statistics of one measurement window. Rates are in percent, except for the cache hit
/// rate, which is reported as a fraction. Anything the workload did not report (because the
/// corresponding feature was disabled) is zero.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Cluster throughput in Mops.
    pub throughput: f64,
    pub cache_hit_rate: f64,
    /// Average lock/CAS failures per write.
    pub lock_fail_count: f64,
    pub invalid_leaf_rate: f64,
    pub speculative_ratio: f64,
    pub speculative_accuracy: f64,
    pub load_factor: f64,
}

impl EpochMetrics {
    pub(crate) fn set(&mut self, field: MetricField, value: f64) {
        let slot = match field {
            MetricField::ClusterThroughput => &mut self.throughput,
            MetricField::CacheHitRate => &mut self.cache_hit_rate,
            MetricField::LockFailCount => &mut self.lock_fail_count,
            MetricField::InvalidLeafRate => &mut self.invalid_leaf_rate,
            MetricField::SpeculativeRatio => &mut self.speculative_ratio,
            MetricField::SpeculativeAccuracy => &mut self.speculative_accuracy,
            MetricField::LoadFactor => &mut self.load_factor,
        };
        *slot = value;
    }

    /// The fraction of reads served correctly from the hotspot buffer, in percent.
    pub fn buffer_hit_ratio(&self) -> f64 {
        self.speculative_ratio * self.speculative_accuracy / 100.0
    }
}

/// The captured stdout of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLog {
    pub node: String,
    pub lines: Vec<String>,
}

/// The output of every node for one workload execution, in rank order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogBundle {
    logs: Vec<NodeLog>,
}

impl LogBundle {
    pub fn from_logs(logs: Vec<NodeLog>) -> Self {
        LogBundle { logs }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeLog> {
        self.logs.iter()
    }

    /// The lines captured from the given node.
    pub fn get(&self, node: &str) -> Option<&[String]> {
        self.logs
            .iter()
            .find(|log| log.node == node)
            .map(|log| log.lines.as_slice())
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for LogBundle {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        LogBundle {
            logs: iter
                .into_iter()
                .map(|(node, lines)| NodeLog { node, lines })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a LogBundle {
    type Item = &'a NodeLog;
    type IntoIter = std::slice::Iter<'a, NodeLog>;

    fn into_iter(self) -> Self::IntoIter {
        self.logs.iter()
    }
}

/// Extraction failures.
#[derive(Debug, Fail)]
pub enum ExtractError {
    /// The workload produced no usable output for these parameters. This must never be papered
    /// over with a zero.
    #[fail(
        display = "none of the {} node logs has a throughput for epoch {}",
        nodes, epoch
    )]
    NoUsableLog { epoch: u64, nodes: usize },

    #[fail(
        display = "none of the {} node logs starts with a number at token {}",
        nodes, token
    )]
    NoScalar { token: usize, nodes: usize },
}

/// Reduce a bundle to the statistics of `target_epoch`, using the first node (in rank order)
/// whose log yields a throughput.
pub fn extract(
    bundle: &LogBundle,
    target_epoch: u64,
    mode: Mode,
) -> Result<EpochMetrics, ExtractError> {
    bundle
        .iter()
        .find_map(|log| extract_node(log.lines.iter().map(String::as_str), target_epoch, mode))
        .ok_or(ExtractError::NoUsableLog {
            epoch: target_epoch,
            nodes: bundle.len(),
        })
}
