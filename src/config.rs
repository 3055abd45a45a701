use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for filter blocks and the multi-queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of independent filter units generated and persisted per filter
    /// block (default: 6).
    pub all_units: u32,

    /// Number of units memory-resident when a reader is opened (default: 2).
    pub init_units: u32,

    /// A new filter region starts every `1 << base_lg` bytes of data-block
    /// space (default: 11, i.e. one region per 2KB).
    pub base_lg: u8,

    /// Sequence ticks without an access before a reader is considered cold
    /// (default: 10_000).
    pub lifetime: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            all_units: 6,
            init_units: 2,
            base_lg: 11,
            lifetime: 10_000,
        }
    }
}

impl FilterConfig {
    /// Set the number of persisted units per filter block
    pub fn all_units(mut self, n: u32) -> Self {
        self.all_units = n;
        self
    }

    /// Set the number of units resident at open
    pub fn init_units(mut self, n: u32) -> Self {
        self.init_units = n;
        self
    }

    /// Set the data-block granularity exponent
    pub fn base_lg(mut self, lg: u8) -> Self {
        self.base_lg = lg;
        self
    }

    /// Set the coldness horizon in sequence ticks
    pub fn lifetime(mut self, ticks: u64) -> Self {
        self.lifetime = ticks;
        self
    }

    /// Check that the parameters describe a usable filter block.
    pub fn validate(&self) -> Result<()> {
        if self.all_units == 0 {
            return Err(Error::InvalidState(
                "at least one filter unit is required".to_string(),
            ));
        }
        if self.init_units > self.all_units {
            return Err(Error::InvalidState(format!(
                "init_units {} exceeds all_units {}",
                self.init_units, self.all_units
            )));
        }
        if self.base_lg >= 32 {
            return Err(Error::InvalidState(format!(
                "base_lg {} out of range",
                self.base_lg
            )));
        }
        if self.lifetime == 0 {
            // A zero horizon would let a reader count as cold in the very
            // access that touched it.
            return Err(Error::InvalidState(
                "lifetime must be at least one sequence tick".to_string(),
            ));
        }
        Ok(())
    }
}
