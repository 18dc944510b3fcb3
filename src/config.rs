// Sampler configuration
//
// Loaded from TOML or built in code; validated before a sampler is created.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SamplerError};
use crate::frame::MAX_DEPTH;

/// Shallowest accepted `max_depth`
pub const MIN_DEPTH: usize = 4;

/// Tunables for a [`Sampler`](crate::sampler::Sampler)
///
/// # Example
/// ```
/// use stacksampler::config::SamplerConfig;
/// use std::time::Duration;
///
/// let config = SamplerConfig::default();
/// assert_eq!(config.interval(), Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// CPU time between samples, in microseconds
    ///
    /// Default: 5000 (5 ms, about 200 samples per CPU-second)
    pub interval_us: u64,

    /// Deepest stack kept, counted in frames of the profiled program; deeper
    /// stacks lose their outermost frames
    ///
    /// Default: 128, which is also the upper bound. Minimum: 4
    pub max_depth: usize,

    /// Distinct stacks the signal handler can count before further new
    /// stacks are dropped. Repeats of a known stack are always counted.
    ///
    /// The table is allocated once per process, so only the first sampler's
    /// value takes effect. Default: 2048
    pub stack_capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_us: 5_000,
            max_depth: MAX_DEPTH,
            stack_capacity: 2048,
        }
    }
}

impl SamplerConfig {
    /// Parse a configuration from TOML text; missing keys take defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SamplerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SamplerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_stack_capacity(mut self, stack_capacity: usize) -> Self {
        self.stack_capacity = stack_capacity;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_us == 0 {
            return Err(SamplerError::InvalidConfig(
                "interval must be at least 1 microsecond".to_string(),
            ));
        }
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&self.max_depth) {
            return Err(SamplerError::InvalidConfig(format!(
                "max_depth must be between {} and {}, got {}",
                MIN_DEPTH, MAX_DEPTH, self.max_depth
            )));
        }
        if self.stack_capacity == 0 {
            return Err(SamplerError::InvalidConfig(
                "stack_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
