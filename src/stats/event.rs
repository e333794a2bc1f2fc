//! Typed decoding of workload log lines.
//!
//! The workload process reports its per-epoch statistics as free text on stdout, e.g.
//!
//! ```text
//! epoch 10 passed!
//! cluster throughput 12.345 Mops
//! cache hit rate: 0.9731
//! avg. lock/cas fail cnt: 0.0120
//! read invalid leaf rate: 0.0020
//! speculative read rate: 0.4200
//! correct ratio of speculative read: 0.9900
//! avg. leaf load factor: 0.8100
//! ```
//!
//! Newer builds can instead emit one versioned JSON record per line:
//!
//! ```text
//! {"v":1,"event":"epoch_passed","epoch":10}
//! {"v":1,"event":"metric","field":"cluster_throughput","value":12.345}
//! {"v":1,"event":"cache_consumed","mb":97.5}
//! ```
//!
//! Both are decoded into the same `LogEvent`s, so the extractors never look at raw text. All
//! knowledge of token offsets lives in `decode_text`.

use log::debug;

use serde::{Deserialize, Serialize};

/// The only record schema version understood by `decode`.
pub const RECORD_VERSION: u32 = 1;

/// The per-epoch statistics reported by the workload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    ClusterThroughput,
    CacheHitRate,
    LockFailCount,
    InvalidLeafRate,
    SpeculativeRatio,
    SpeculativeAccuracy,
    /// The last statistic of every epoch block.
    LoadFactor,
}

impl MetricField {
    /// In the order the text decoder tries them.
    pub const ALL: [MetricField; 7] = [
        MetricField::ClusterThroughput,
        MetricField::CacheHitRate,
        MetricField::LockFailCount,
        MetricField::InvalidLeafRate,
        MetricField::SpeculativeRatio,
        MetricField::SpeculativeAccuracy,
        MetricField::LoadFactor,
    ];

    /// A dense index, usable for per-field arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The substring identifying this statistic in the text format.
    fn marker(self) -> &'static str {
        match self {
            MetricField::ClusterThroughput => "cluster throughput",
            MetricField::CacheHitRate => "cache hit rate",
            MetricField::LockFailCount => "avg. lock/cas fail cnt",
            MetricField::InvalidLeafRate => "read invalid leaf rate",
            MetricField::SpeculativeRatio => "speculative read rate",
            MetricField::SpeculativeAccuracy => "correct ratio of speculative read",
            MetricField::LoadFactor => "avg. leaf load factor",
        }
    }

    /// The position of the value in the space-separated text line.
    fn token(self) -> usize {
        match self {
            MetricField::ClusterThroughput => 2,
            MetricField::CacheHitRate => 3,
            MetricField::LockFailCount => 4,
            MetricField::InvalidLeafRate => 4,
            MetricField::SpeculativeRatio => 3,
            MetricField::SpeculativeAccuracy => 5,
            MetricField::LoadFactor => 4,
        }
    }

    /// Fractions (0-1) that are reported as percentages.
    fn is_fraction(self) -> bool {
        match self {
            MetricField::InvalidLeafRate
            | MetricField::SpeculativeRatio
            | MetricField::SpeculativeAccuracy
            | MetricField::LoadFactor => true,
            MetricField::ClusterThroughput
            | MetricField::CacheHitRate
            | MetricField::LockFailCount => false,
        }
    }

    /// Convert a raw reported value into the unit we record.
    pub fn ingest(self, raw: f64) -> f64 {
        if self.is_fraction() {
            raw * 100.0
        } else {
            raw
        }
    }

    pub fn is_terminator(self) -> bool {
        self == MetricField::LoadFactor
    }
}

/// One decoded log line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LogEvent {
    /// The workload finished the given epoch; the statistics of that epoch follow.
    EpochPassed(u64),

    /// A statistic of the current epoch, already scaled by `MetricField::ingest`. `value` is
    /// `None` if the line was recognized but its value was not numeric (e.g. `-nan`, or a line
    /// garbled by a concurrent writer).
    Sample {
        field: MetricField,
        value: Option<f64>,
    },

    /// Consumed index cache in MB.
    CacheConsumed(Option<f64>),

    /// Consumed hotspot buffer in MB. Always the last memory counter a node reports.
    HotspotBufferConsumed(Option<f64>),
}

impl LogEvent {
    /// Events the executor keeps when asked for throughput-only output.
    pub fn is_throughput_relevant(&self) -> bool {
        match self {
            LogEvent::EpochPassed(_) => true,
            LogEvent::Sample { field, .. } => {
                *field == MetricField::ClusterThroughput || field.is_terminator()
            }
            LogEvent::CacheConsumed(_) | LogEvent::HotspotBufferConsumed(_) => false,
        }
    }
}

/// Decode a single line, in either format. Lines that carry no statistic decode to `None`.
pub fn decode(line: &str) -> Option<LogEvent> {
    let line = line.trim();
    if line.starts_with('{') {
        decode_record(line)
    } else {
        decode_text(line)
    }
}

/// Returns true if the line should survive throughput-only filtering.
pub fn is_throughput_relevant(line: &str) -> bool {
    decode(line).map_or(false, |event| event.is_throughput_relevant())
}

fn decode_text(line: &str) -> Option<LogEvent> {
    if let Some(epoch) = epoch_marker(line) {
        return Some(LogEvent::EpochPassed(epoch));
    }

    for field in MetricField::ALL.iter() {
        if line.contains(field.marker()) {
            return Some(LogEvent::Sample {
                field: *field,
                value: numeric_token(line, field.token()).map(|v| field.ingest(v)),
            });
        }
    }

    if line.contains("consumed cache size") {
        return Some(LogEvent::CacheConsumed(numeric_token(line, 4)));
    }

    if line.contains("consumed hotspot buffer size") {
        return Some(LogEvent::HotspotBufferConsumed(numeric_token(line, 5)));
    }

    None
}

/// Parses `epoch <n> passed!` anywhere in the line.
fn epoch_marker(line: &str) -> Option<u64> {
    line.match_indices("epoch ").find_map(|(idx, marker)| {
        let rest = &line[idx + marker.len()..];
        let end = rest.find(" passed!")?;
        rest[..end].parse::<u64>().ok()
    })
}

/// The `idx`-th space-separated token, if it looks like a non-negative decimal number.
pub(crate) fn numeric_token(line: &str, idx: usize) -> Option<f64> {
    let token = line.split(' ').nth(idx)?;
    let looks_numeric = token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.');
    if looks_numeric {
        token.parse::<f64>().ok()
    } else {
        None
    }
}

#[derive(Deserialize)]
struct Envelope {
    v: u32,
    #[serde(flatten)]
    record: Record,
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Record {
    EpochPassed { epoch: u64 },
    Metric { field: MetricField, value: Option<f64> },
    CacheConsumed { mb: Option<f64> },
    HotspotBufferConsumed { mb: Option<f64> },
}

fn decode_record(line: &str) -> Option<LogEvent> {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!("Ignoring undecodable record {:?}: {}", line, err);
            return None;
        }
    };

    if envelope.v != RECORD_VERSION {
        debug!("Ignoring record with unsupported version {}", envelope.v);
        return None;
    }

    Some(match envelope.record {
        Record::EpochPassed { epoch } => LogEvent::EpochPassed(epoch),
        Record::Metric { field, value } => LogEvent::Sample {
            field,
            value: value.map(|v| field.ingest(v)),
        },
        Record::CacheConsumed { mb } => LogEvent::CacheConsumed(mb),
        Record::HotspotBufferConsumed { mb } => LogEvent::HotspotBufferConsumed(mb),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(field: MetricField, value: f64) -> Option<LogEvent> {
        Some(LogEvent::Sample {
            field,
            value: Some(value),
        })
    }

    #[test]
    fn text_lines() {
        assert_eq!(decode("epoch 10 passed!"), Some(LogEvent::EpochPassed(10)));
        assert_eq!(
            decode("cluster throughput 12.345 Mops\n"),
            sample(MetricField::ClusterThroughput, 12.345)
        );
        assert_eq!(
            decode("cache hit rate: 0.5"),
            sample(MetricField::CacheHitRate, 0.5)
        );
        assert_eq!(
            decode("avg. lock/cas fail cnt: 1.5"),
            sample(MetricField::LockFailCount, 1.5)
        );
        assert_eq!(
            decode("speculative read rate: 0.42"),
            sample(MetricField::SpeculativeRatio, 42.0)
        );
        assert_eq!(
            decode("correct ratio of speculative read: 0.5"),
            sample(MetricField::SpeculativeAccuracy, 50.0)
        );
        assert_eq!(
            decode("consumed cache size = 97.500 MB"),
            Some(LogEvent::CacheConsumed(Some(97.5)))
        );
        assert_eq!(
            decode("consumed hotspot buffer size = 3.250000 MB"),
            Some(LogEvent::HotspotBufferConsumed(Some(3.25)))
        );
        assert_eq!(decode("0, throughput 1.2345"), None);
        assert_eq!(decode("Thread 3 joined."), None);
    }

    #[test]
    fn epoch_marker_must_be_exact() {
        assert_eq!(decode("epoch 11 passed!"), Some(LogEvent::EpochPassed(11)));
        assert_eq!(decode("epoch passed!"), None);
        assert_eq!(decode("epoch x passed!"), None);
    }

    #[test]
    fn non_numeric_values_are_kept_as_none() {
        assert_eq!(
            decode("avg. leaf load factor: -nan"),
            Some(LogEvent::Sample {
                field: MetricField::LoadFactor,
                value: None,
            })
        );
        assert_eq!(
            decode("read invalid leaf rate: -"),
            Some(LogEvent::Sample {
                field: MetricField::InvalidLeafRate,
                value: None,
            })
        );
        assert_eq!(
            decode("cluster throughput"),
            Some(LogEvent::Sample {
                field: MetricField::ClusterThroughput,
                value: None,
            })
        );
    }

    #[test]
    fn records() {
        assert_eq!(
            decode(r#"{"v":1,"event":"epoch_passed","epoch":4}"#),
            Some(LogEvent::EpochPassed(4))
        );
        assert_eq!(
            decode(r#"{"v":1,"event":"metric","field":"load_factor","value":0.25}"#),
            sample(MetricField::LoadFactor, 25.0)
        );
        assert_eq!(
            decode(r#"{"v":1,"event":"metric","field":"cache_hit_rate","value":null}"#),
            Some(LogEvent::Sample {
                field: MetricField::CacheHitRate,
                value: None,
            })
        );
        assert_eq!(
            decode(r#"{"v":1,"event":"hotspot_buffer_consumed","mb":2.0}"#),
            Some(LogEvent::HotspotBufferConsumed(Some(2.0)))
        );
        assert_eq!(decode(r#"{"v":2,"event":"epoch_passed","epoch":4}"#), None);
        assert_eq!(decode(r#"{"v":1,"event":"reboot"}"#), None);
        assert_eq!(decode("{not json"), None);
    }

    #[test]
    fn throughput_relevance() {
        assert!(is_throughput_relevant("epoch 3 passed!"));
        assert!(is_throughput_relevant("cluster throughput 1.0 Mops"));
        assert!(is_throughput_relevant("avg. leaf load factor: 0.5"));
        assert!(!is_throughput_relevant("cache hit rate: 0.5"));
        assert!(!is_throughput_relevant("random chatter"));
    }
}
