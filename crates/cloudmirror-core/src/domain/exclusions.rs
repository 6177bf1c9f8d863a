//! Sync exclusion rules
//!
//! Names matching one of the patterns are never synced. Files outside the
//! optional size bounds are skipped as well. Bounds are stored as a value
//! plus a unit exponent (`0` = bytes, `1` = KiB, `2` = MiB, `3` = GiB) and
//! handed to the engine in bytes.

use serde::{Deserialize, Serialize};

/// A size bound expressed as `value × 1024^unit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimit {
    pub value: u64,
    pub unit: u32,
}

impl SizeLimit {
    pub fn new(value: u64, unit: u32) -> Self {
        Self { value, unit }
    }

    /// Returns the bound in bytes, saturating on overflow
    pub fn bytes(&self) -> u64 {
        1024u64
            .checked_pow(self.unit)
            .and_then(|scale| self.value.checked_mul(scale))
            .unwrap_or(u64::MAX)
    }
}

/// Names and size bounds excluded from every sync pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRules {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub lower_limit: Option<SizeLimit>,
    #[serde(default)]
    pub upper_limit: Option<SizeLimit>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            names: vec![
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "~*".to_string(),
                ".*".to_string(),
            ],
            lower_limit: None,
            upper_limit: None,
        }
    }
}

impl ExclusionRules {
    /// Lower bound in bytes; `0` disables the bound
    pub fn lower_bytes(&self) -> u64 {
        self.lower_limit.map_or(0, |l| l.bytes())
    }

    /// Upper bound in bytes; `0` disables the bound
    pub fn upper_bytes(&self) -> u64 {
        self.upper_limit.map_or(0, |l| l.bytes())
    }
}
