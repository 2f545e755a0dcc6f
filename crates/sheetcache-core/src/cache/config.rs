use serde::{Deserialize, Serialize};

use crate::error::{Result, SheetcacheError};

pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Construction-time options for [`FormulaCache`](super::FormulaCache).
///
/// Accepts both the wire spelling (`maxSize`, `ttl`) and the TOML spelling
/// (`max_size`, `ttl_ms`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(alias = "maxSize")]
    pub max_size: usize,
    #[serde(alias = "ttl")]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_size: DEFAULT_MAX_SIZE,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

impl CacheConfig {
    pub fn new(max_size: usize, ttl_ms: u64) -> Self {
        CacheConfig { max_size, ttl_ms }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(SheetcacheError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.ttl_ms > i64::MAX as u64 {
            return Err(SheetcacheError::InvalidConfig(format!(
                "ttl_ms must be <= {}",
                i64::MAX
            )));
        }
        Ok(())
    }
}
