//! Monitor configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::capture::DEFAULT_FILTER;
use crate::sweep::SweepConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,
    #[error("sweep cap must be at least one entry")]
    ZeroSweepCap,
    #[error("capture filter must not be empty")]
    EmptyFilter,
}

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Interface { name: String, promisc: bool },
    File(PathBuf),
}

/// Configuration for the DNS monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub target: CaptureTarget,
    /// BPF expression applied to the capture.
    pub filter: String,
    pub sweep: SweepConfig,
    /// Period of the status line; `None` disables it.
    pub stats_interval: Option<Duration>,
}

impl MonitorConfig {
    pub fn new(target: CaptureTarget) -> Self {
        Self {
            target,
            filter: DEFAULT_FILTER.to_string(),
            sweep: SweepConfig::default(),
            stats_interval: Some(Duration::from_secs(60)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.sweep.max_inspect == 0 {
            return Err(ConfigError::ZeroSweepCap);
        }
        if self.filter.trim().is_empty() {
            return Err(ConfigError::EmptyFilter);
        }
        Ok(())
    }
}
