//! Runtime configuration.
//!
//! All durations are stored in milliseconds so a config can be read from
//! JSON without custom duration parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for the scheduler, differ and error boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Minimum time between two committed render passes (60 Hz by default).
    pub frame_interval_ms: u64,
    /// Maximum nesting of component expansions before the pass is aborted.
    pub max_expansion_depth: usize,
    /// Upper bound for a cross-thread wait on a commit.
    pub marshal_timeout_ms: u64,
    /// Number of cached diff results (0 disables the cache).
    pub diff_cache_capacity: usize,
    /// Diffs producing more patches than this are not cached.
    pub diff_cache_max_patches: usize,
    /// Fold several moves in one keyed list into a single reorder patch.
    pub coalesce_moves: bool,
    /// Number of error records kept by the error boundary.
    pub error_history: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            max_expansion_depth: 100,
            marshal_timeout_ms: 250,
            diff_cache_capacity: 1000,
            diff_cache_max_patches: 50,
            coalesce_moves: false,
            error_history: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_expansion_depth == 0 {
            return Err(Error::Config("max_expansion_depth must be at least 1".into()));
        }
        if self.marshal_timeout_ms == 0 {
            return Err(Error::Config("marshal_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn marshal_timeout(&self) -> Duration {
        Duration::from_millis(self.marshal_timeout_ms)
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    pub fn with_coalesce_moves(mut self, coalesce: bool) -> Self {
        self.coalesce_moves = coalesce;
        self
    }
}
