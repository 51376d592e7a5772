//! Streaming engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Alignment the upstream requires for paginated fetch offsets and limits
pub const CHUNK_ALIGNMENT: u64 = 4096;

/// Largest chunk the upstream serves in one request
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Bytes requested per upstream fetch
    pub chunk_size: u64,

    /// Period between full descriptor cache sweeps
    pub cache_clean_interval: Duration,

    /// Flood waits slept through before a lookup is reported as rate limited
    pub max_flood_waits: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            cache_clean_interval: Duration::from_secs(30 * 60),
            max_flood_waits: 3,
        }
    }
}

impl StreamerConfig {
    /// Create configuration from `MEDIARELAY_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; absent or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            chunk_size: read("MEDIARELAY_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            cache_clean_interval: read("MEDIARELAY_CACHE_CLEAN_SECS")
                .map_or(defaults.cache_clean_interval, Duration::from_secs),
            max_flood_waits: read("MEDIARELAY_MAX_FLOOD_WAITS")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.max_flood_waits),
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_cache_clean_interval(mut self, interval: Duration) -> Self {
        self.cache_clean_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_flood_waits(mut self, max_flood_waits: u32) -> Self {
        self.max_flood_waits = max_flood_waits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(StreamError::Config(format!(
                "chunk size {} must be a positive multiple of {CHUNK_ALIGNMENT}",
                self.chunk_size
            )));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(StreamError::Config(format!(
                "chunk size {} exceeds the {MAX_CHUNK_SIZE} byte limit",
                self.chunk_size
            )));
        }
        if self.cache_clean_interval.is_zero() {
            return Err(StreamError::Config(
                "cache clean interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
