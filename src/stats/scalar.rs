//! Single-number microbenchmarks.
//!
//! Some test programs (e.g. the hash table load factor or metadata size tests) run once on one
//! node and print their result as a token of their first output line:
//!
//! ```text
//! hash load factor: 0.8125
//! ```

use serde::{Deserialize, Serialize};

use super::{event::numeric_token, ExtractError, LogBundle};

/// Where the result is in the first output line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarLine {
    /// Index into the space-separated tokens of the trimmed line.
    pub token: usize,
    /// The value is a fraction to be recorded as a percentage.
    #[serde(default)]
    pub percent: bool,
}

impl ScalarLine {
    /// The value on `line`, if the token is there and numeric.
    pub fn value(&self, line: &str) -> Option<f64> {
        let value = numeric_token(line.trim(), self.token)?;
        Some(if self.percent { value * 100.0 } else { value })
    }
}

/// The value from the first output line of the first node that printed one.
pub fn extract_scalar(bundle: &LogBundle, line: &ScalarLine) -> Result<f64, ExtractError> {
    bundle
        .iter()
        .find_map(|log| log.lines.first().and_then(|first| line.value(first)))
        .ok_or(ExtractError::NoScalar {
            token: line.token,
            nodes: bundle.len(),
        })
}
