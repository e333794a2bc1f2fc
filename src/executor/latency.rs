//! Latency histograms written by the workload.
//!
//! Every worker writes `us_lat/epoch_<n>.lat`, one bucket per line: the latency in microseconds
//! (with one decimal) and the number of operations that fell in that bucket, separated by a tab.

use serde::{Deserialize, Serialize};

/// Operation latency percentiles in microseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Latencies {
    pub p50: f64,
    pub p99: f64,
}

/// Marks the start of an epoch's histogram in the output of `collect_script`.
const SECTION_MARKER: &str = "### epoch";

/// A latency histogram. Buckets are kept sorted by latency.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    buckets: Vec<(f64, u64)>,
}

impl Histogram {
    /// Parse the contents of one `.lat` file.
    pub fn parse<'a, I>(lines: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hist = Histogram::default();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (lat, count) = match (parts.next(), parts.next(), parts.next()) {
                (Some(lat), Some(count), None) => (lat, count),
                _ => return Err(format!("malformed histogram line {:?}", line)),
            };
            let lat = match lat.parse::<f64>() {
                Ok(l) if l.is_finite() => l,
                Ok(_) => return Err(format!("bad latency {:?}: not a finite number", lat)),
                Err(e) => return Err(format!("bad latency {:?}: {}", lat, e)),
            };
            let count = count
                .parse::<u64>()
                .map_err(|e| format!("bad count {:?}: {}", count, e))?;

            hist.add(lat, count);
        }
        Ok(hist)
    }

    fn add(&mut self, lat: f64, count: u64) {
        match self
            .buckets
            .binary_search_by(|(l, _)| l.partial_cmp(&lat).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(idx) => self.buckets[idx].1 += count,
            Err(idx) => self.buckets.insert(idx, (lat, count)),
        }
    }

    /// Fold another histogram into this one.
    pub fn merge(&mut self, other: &Histogram) {
        for (lat, count) in other.buckets.iter() {
            self.add(*lat, *count);
        }
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    /// The smallest latency such that at least `p` (0-1) of all operations were at least as
    /// fast. `None` if the histogram is empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let threshold = ((total as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (lat, count) in self.buckets.iter() {
            seen += count;
            if seen >= threshold {
                return Some(*lat);
            }
        }

        self.buckets.last().map(|(lat, _)| *lat)
    }
}

/// A shell script that prints the histogram of each given epoch, each preceded by a marker line.
/// A missing file makes the script fail.
pub fn collect_script(dir: &str, epochs: &[u64]) -> String {
    let epochs: Vec<_> = epochs.iter().map(u64::to_string).collect();
    format!(
        "cd {} && for e in {}; do echo \"{} $e\" && cat epoch_$e.lat || exit 1; done",
        dir,
        epochs.join(" "),
        SECTION_MARKER
    )
}

/// Split the output of `collect_script` back into per-epoch histograms.
pub fn parse_sections(lines: &[String]) -> Result<Vec<(u64, Histogram)>, String> {
    let mut sections = vec![];
    let mut current: Option<(u64, Vec<&str>)> = None;

    for line in lines.iter() {
        if let Some(epoch) = line.trim().strip_prefix(SECTION_MARKER) {
            if let Some((epoch, body)) = current.take() {
                sections.push((epoch, Histogram::parse(body)?));
            }
            let epoch = epoch
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("bad epoch marker {:?}: {}", line, e))?;
            current = Some((epoch, vec![]));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line.as_str());
        } else if !line.trim().is_empty() {
            return Err(format!("histogram data before any epoch marker: {:?}", line));
        }
    }

    if let Some((epoch, body)) = current.take() {
        sections.push((epoch, Histogram::parse(body)?));
    }

    Ok(sections)
}

/// Merge the per-node histograms of each epoch and compute the percentiles. With more than one
/// epoch, the per-epoch percentiles are averaged.
pub fn aggregate(per_node: &[Vec<(u64, Histogram)>], epochs: &[u64]) -> Result<Latencies, String> {
    if epochs.is_empty() {
        return Err("no epochs requested".into());
    }

    let mut p50 = 0.0;
    let mut p99 = 0.0;
    for epoch in epochs.iter() {
        let mut merged = Histogram::default();
        for node in per_node.iter() {
            for (_, hist) in node.iter().filter(|(e, _)| e == epoch) {
                merged.merge(hist);
            }
        }

        p50 += merged
            .percentile(0.50)
            .ok_or_else(|| format!("empty latency histogram for epoch {}", epoch))?;
        p99 += merged
            .percentile(0.99)
            .ok_or_else(|| format!("empty latency histogram for epoch {}", epoch))?;
    }

    let n = epochs.len() as f64;
    Ok(Latencies {
        p50: p50 / n,
        p99: p99 / n,
    })
}
