use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::BURST_SIZE;
use crate::types::MIN_BUS_FRAME_LEN;

/// Largest frame a pool buffer may hold (jumbo frames excluded).
pub const MAX_FRAME_SIZE: usize = 9216;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("worker count {0} must be 0 or a power of two")]
    Workers(usize),
    #[error("ring capacity {0} is smaller than one burst ({BURST_SIZE})")]
    RingCapacity(usize),
    #[error("pool size {0} is smaller than one burst ({BURST_SIZE})")]
    PoolSize(usize),
    #[error("frame size {0} must be between {MIN_BUS_FRAME_LEN} and {MAX_FRAME_SIZE}")]
    FrameSize(usize),
    #[error("{total} SV streams exceed the APPID space")]
    TooManySv { total: usize },
    #[error("{0} GOOSE sources exceed the APPID space")]
    TooManyGoose(usize),
    #[error("stats interval must be at least one second")]
    StatsInterval,
}

/// Runtime settings of the probe.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Number of synthetic GOOSE publishers to expect
    pub goose_sources: usize,
    /// Number of single-ASDU SV streams to expect
    pub sv80_sources: usize,
    /// Number of 8-ASDU SV streams to expect
    pub sv256_sources: usize,
    /// Worker threads; 0 processes frames on the receiving thread
    pub workers: usize,
    /// Slots per worker ring
    pub ring_capacity: usize,
    /// Receive buffers shared by all threads
    pub pool_size: usize,
    /// Bytes per receive buffer
    pub frame_size: usize,
    pub stats_interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            goose_sources: 0,
            sv80_sources: 0,
            sv256_sources: 0,
            workers: 0,
            ring_capacity: 16 * 1024,
            pool_size: 32 * 1024,
            frame_size: 2048,
            stats_interval_secs: 1,
        }
    }
}

impl ProbeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: ProbeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers != 0 && !self.workers.is_power_of_two() {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.ring_capacity < BURST_SIZE {
            return Err(ConfigError::RingCapacity(self.ring_capacity));
        }
        if self.pool_size < BURST_SIZE {
            return Err(ConfigError::PoolSize(self.pool_size));
        }
        if !(MIN_BUS_FRAME_LEN..=MAX_FRAME_SIZE).contains(&self.frame_size) {
            return Err(ConfigError::FrameSize(self.frame_size));
        }
        // APPID 0 is never assigned
        let appids = u16::MAX as usize;
        if self.goose_sources >= appids {
            return Err(ConfigError::TooManyGoose(self.goose_sources));
        }
        let sv_total = self.sv80_sources + self.sv256_sources;
        if sv_total >= appids {
            return Err(ConfigError::TooManySv { total: sv_total });
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::StatsInterval);
        }
        Ok(())
    }

    /// Number of pipelines the probe runs: one per worker, or one inline.
    pub fn pipelines(&self) -> usize {
        self.workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProbeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 16384);
        assert_eq!(config.pipelines(), 1);
    }

    #[test]
    fn test_partial_json() {
        let config = ProbeConfig::from_json_str(r#"{ "goose_sources": 100, "workers": 4 }"#).unwrap();
        assert_eq!(config.goose_sources, 100);
        assert_eq!(config.workers, 4);
        assert_eq!(config.frame_size, 2048);
        assert_eq!(config.pipelines(), 4);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ProbeConfig::from_json_str(r#"{ "gooses": 1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let invalid = [
            ProbeConfig {
                workers: 3,
                ..Default::default()
            },
            ProbeConfig {
                ring_capacity: 8,
                ..Default::default()
            },
            ProbeConfig {
                frame_size: 32,
                ..Default::default()
            },
            ProbeConfig {
                sv80_sources: 40000,
                sv256_sources: 30000,
                ..Default::default()
            },
            ProbeConfig {
                stats_interval_secs: 0,
                ..Default::default()
            },
        ];
        for config in invalid {
            assert!(config.validate().is_err(), "{:?}", config);
        }

        assert!(matches!(
            ProbeConfig {
                workers: 6,
                ..Default::default()
            }
            .validate(),
            Err(ConfigError::Workers(6))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ProbeConfig::from_file("/nonexistent/probe.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/probe.json"));
    }
}
