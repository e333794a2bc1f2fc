//! The index designs being compared, and their variants.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The cache size (in MB) patched in for the sufficient-cache variant.
pub const SUFFICIENT_CACHE_MB: u64 = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BaseMethod {
    Chime,
    Sherman,
    Smart,
    Rolex,
    Marlin,
}

impl BaseMethod {
    pub fn label(self) -> &'static str {
        match self {
            BaseMethod::Chime => "CHIME",
            BaseMethod::Sherman => "Sherman",
            BaseMethod::Smart => "SMART",
            BaseMethod::Rolex => "ROLEX",
            BaseMethod::Marlin => "Marlin",
        }
    }

    /// The project directory the method is built from. Sherman lives in the CHIME tree.
    pub fn project(self) -> BaseMethod {
        match self {
            BaseMethod::Sherman => BaseMethod::Chime,
            other => other,
        }
    }

    /// Everything but SMART is configured with a leaf span size.
    pub fn needs_span_size(self) -> bool {
        self != BaseMethod::Smart
    }

    pub fn needs_epsilon(self) -> bool {
        self == BaseMethod::Rolex
    }

    /// Neighborhood and hotspot buffer sizes (and optionally the greedy IO size).
    pub fn needs_hotspot_params(self) -> bool {
        match self {
            BaseMethod::Chime | BaseMethod::Rolex => true,
            _ => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Standard,
    /// Run with enough cache to hold the whole index (`-SC`).
    SufficientCache,
    /// `-indirect`
    Indirect,
    /// `-RCU`
    Rcu,
}

impl Variant {
    fn suffix(self) -> &'static str {
        match self {
            Variant::Standard => "",
            Variant::SufficientCache => "-SC",
            Variant::Indirect => "-indirect",
            Variant::Rcu => "-RCU",
        }
    }
}

/// A method under test, e.g. `SMART-SC` or `CHIME`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Method {
    pub base: BaseMethod,
    pub variant: Variant,
}

impl Method {
    pub fn new(base: BaseMethod, variant: Variant) -> Self {
        Method { base, variant }
    }

    /// The cache size to build with, given the configured one.
    pub fn cache_size(&self, configured_mb: u64) -> u64 {
        match self.variant {
            Variant::SufficientCache => SUFFICIENT_CACHE_MB,
            _ => configured_mb,
        }
    }

    /// Look up a per-method setting by full label (`SMART-SC`), falling back to the base label
    /// (`SMART`).
    pub fn lookup<'a, V>(&self, table: &'a HashMap<String, V>) -> Option<&'a V> {
        table
            .get(&self.to_string())
            .or_else(|| table.get(self.base.label()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base.label(), self.variant.suffix())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const BASES: [BaseMethod; 5] = [
            BaseMethod::Chime,
            BaseMethod::Sherman,
            BaseMethod::Smart,
            BaseMethod::Rolex,
            BaseMethod::Marlin,
        ];
        const VARIANTS: [Variant; 3] = [Variant::SufficientCache, Variant::Indirect, Variant::Rcu];

        let s = s.trim();
        for base in BASES.iter() {
            let rest = match s.strip_prefix(base.label()) {
                Some(rest) => rest,
                None => continue,
            };

            if rest.is_empty() {
                return Ok(Method::new(*base, Variant::Standard));
            }

            if let Some(variant) = VARIANTS.iter().find(|v| v.suffix() == rest) {
                return Ok(Method::new(*base, *variant));
            }
        }

        Err(format!("unknown method {:?}", s))
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
