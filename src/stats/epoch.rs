//! Reduce one node's log to the statistics of a target epoch.
//!
//! There are two reductions:
//!
//! - `Mode::Snapshot` takes the values reported for exactly the target epoch.
//! - `Mode::Windowed` averages every epoch from `window_start(target)` through the target. This
//!   smooths out the noise of a single epoch while skipping the warm-up half of the run.
//!
//! Both are small state machines fed with decoded `LogEvent`s.

use log::debug;

use serde::{Deserialize, Serialize};

use super::{
    event::{decode, LogEvent, MetricField},
    EpochMetrics,
};

/// How to reduce a node's log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Snapshot,
    Windowed,
}

/// The first epoch of the averaging window for the given target epoch.
pub fn window_start(target_epoch: u64) -> u64 {
    std::cmp::max(target_epoch / 2, target_epoch.saturating_sub(4))
}

/// The epochs averaged in `Mode::Windowed`, in order.
pub fn window_epochs(target_epoch: u64) -> std::ops::RangeInclusive<u64> {
    window_start(target_epoch)..=target_epoch
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SnapshotState {
    SeekingEpoch,
    Accumulating,
    Done,
}

/// Last-write-wins capture of one epoch block.
#[derive(Debug)]
pub struct SnapshotExtractor {
    target: u64,
    state: SnapshotState,
    throughput: Option<f64>,
    metrics: EpochMetrics,
}

impl SnapshotExtractor {
    pub fn new(target_epoch: u64) -> Self {
        SnapshotExtractor {
            target: target_epoch,
            state: SnapshotState::SeekingEpoch,
            throughput: None,
            metrics: EpochMetrics::default(),
        }
    }

    /// Feed one event. Returns true once the extraction is complete.
    pub fn feed(&mut self, event: &LogEvent) -> bool {
        match (self.state, event) {
            (SnapshotState::SeekingEpoch, LogEvent::EpochPassed(epoch)) if *epoch == self.target => {
                self.state = SnapshotState::Accumulating;
            }

            (SnapshotState::Accumulating, LogEvent::Sample { field, value }) => {
                if let Some(value) = value {
                    if *field == MetricField::ClusterThroughput {
                        self.throughput = Some(*value);
                    } else {
                        self.metrics.set(*field, *value);
                    }
                }
                if field.is_terminator() {
                    self.state = SnapshotState::Done;
                }
            }

            _ => {}
        }

        self.state == SnapshotState::Done
    }

    /// The captured statistics, or `None` if no throughput was reported for the target epoch.
    pub fn finish(self) -> Option<EpochMetrics> {
        let metrics = self.metrics;
        self.throughput.map(|throughput| EpochMetrics {
            throughput,
            ..metrics
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WindowState {
    SeekingStart,
    Accumulating,
    Done,
}

/// Averages every statistic over the window `window_start(target) ..= target`.
#[derive(Debug)]
pub struct WindowExtractor {
    start: u64,
    window_len: u64,
    state: WindowState,
    samples: [Vec<f64>; 7],
    terminators: u64,
}

impl WindowExtractor {
    pub fn new(target_epoch: u64) -> Self {
        let start = window_start(target_epoch);
        WindowExtractor {
            start,
            window_len: target_epoch - start + 1,
            state: WindowState::SeekingStart,
            samples: Default::default(),
            terminators: 0,
        }
    }

    /// Feed one event. Returns true once the extraction is complete.
    pub fn feed(&mut self, event: &LogEvent) -> bool {
        match (self.state, event) {
            (WindowState::SeekingStart, LogEvent::EpochPassed(epoch)) if *epoch == self.start => {
                self.state = WindowState::Accumulating;
            }

            // The window start showed up again: the workload restarted mid-run. Only the latest
            // run is contiguous, so start over.
            (WindowState::Accumulating, LogEvent::EpochPassed(epoch)) if *epoch == self.start => {
                if self.terminators > 0 || self.samples.iter().any(|s| !s.is_empty()) {
                    debug!("Epoch {} repeated; discarding earlier samples", epoch);
                    self.samples = Default::default();
                    self.terminators = 0;
                }
            }

            (WindowState::Accumulating, LogEvent::Sample { field, value }) => {
                if let Some(value) = value {
                    self.samples[field.index()].push(*value);
                }
                if field.is_terminator() {
                    self.terminators += 1;
                    if self.terminators == self.window_len {
                        self.state = WindowState::Done;
                    }
                }
            }

            _ => {}
        }

        self.state == WindowState::Done
    }

    /// The averaged statistics, or `None` if no throughput sample was seen in the window.
    pub fn finish(self) -> Option<EpochMetrics> {
        fn mean(samples: &[f64]) -> f64 {
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        }

        let throughput = &self.samples[MetricField::ClusterThroughput.index()];
        if throughput.is_empty() {
            return None;
        }

        let mut metrics = EpochMetrics::default();
        for field in MetricField::ALL.iter() {
            metrics.set(*field, mean(&self.samples[field.index()]));
        }
        Some(metrics)
    }
}

/// Either reduction, chosen at runtime.
#[derive(Debug)]
pub enum EpochExtractor {
    Snapshot(SnapshotExtractor),
    Windowed(WindowExtractor),
}

impl EpochExtractor {
    pub fn new(target_epoch: u64, mode: Mode) -> Self {
        match mode {
            Mode::Snapshot => EpochExtractor::Snapshot(SnapshotExtractor::new(target_epoch)),
            Mode::Windowed => EpochExtractor::Windowed(WindowExtractor::new(target_epoch)),
        }
    }

    pub fn feed(&mut self, event: &LogEvent) -> bool {
        match self {
            EpochExtractor::Snapshot(ex) => ex.feed(event),
            EpochExtractor::Windowed(ex) => ex.feed(event),
        }
    }

    pub fn finish(self) -> Option<EpochMetrics> {
        match self {
            EpochExtractor::Snapshot(ex) => ex.finish(),
            EpochExtractor::Windowed(ex) => ex.finish(),
        }
    }
}

/// Reduce one node's log. Lines after the end of the target epoch (or window) are not read.
/// Returns `None` if the log holds no usable throughput for the requested epoch(s).
pub fn extract_node<'a, I>(lines: I, target_epoch: u64, mode: Mode) -> Option<EpochMetrics>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut extractor = EpochExtractor::new(target_epoch, mode);
    for event in lines.into_iter().filter_map(decode) {
        if extractor.feed(&event) {
            break;
        }
    }
    extractor.finish()
}
