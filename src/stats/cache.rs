//! Memory consumption counters reported at the end of a run.

use serde::{Deserialize, Serialize};

use super::{
    event::{decode, LogEvent},
    LogBundle,
};

/// Cross-node averages of the memory counters, in MB.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub consumed_cache_mb: f64,
    pub consumed_hotspot_buffer_mb: f64,
}

/// Average the consumed cache and hotspot buffer sizes over the nodes that report them.
///
/// For each node, the last cache size seen before the hotspot buffer line counts; the hotspot
/// buffer line ends that node's scan. Nodes that report nothing are left out of the average, and
/// if no node reports anything the result is all zeros.
pub fn cache_statistics(bundle: &LogBundle) -> CacheStats {
    let mut cache = vec![];
    let mut hotspot = vec![];

    for log in bundle.iter() {
        let mut last_cache = None;
        for event in log.lines.iter().filter_map(|line| decode(line)) {
            match event {
                LogEvent::CacheConsumed(Some(mb)) => last_cache = Some(mb),
                LogEvent::HotspotBufferConsumed(mb) => {
                    hotspot.extend(mb);
                    break;
                }
                _ => {}
            }
        }
        cache.extend(last_cache);
    }

    fn avg(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    CacheStats {
        consumed_cache_mb: avg(&cache),
        consumed_hotspot_buffer_mb: avg(&hotspot),
    }
}
