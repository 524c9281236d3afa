//! Bridge configuration.
//!
//! Deserializable from any of the data formats the loader understands; every
//! field has a default so partial files are fine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::RegisterCodec;
use crate::register_map::RegisterMapConfig;

/// Largest quantity of a single Modbus "write multiple registers" request.
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

/// Default wall-clock pause between iterations.
pub const DEFAULT_PACING_MS: u64 = 1000;

/// Errors in a bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_registers_per_write must be within 1..={MAX_REGISTERS_PER_WRITE}, got {0}")]
    InvalidWriteChunk(u16),
}

/// Everything the bridge loop needs besides its engine and transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Pause between iterations, in milliseconds. Wall time, not sim time.
    pub pacing_ms: u64,
    /// Upper bound on registers per write request.
    pub max_registers_per_write: u16,
    /// Stop after this many iterations. Unbounded when absent.
    pub max_iterations: Option<u64>,
    pub map: RegisterMapConfig,
    pub codec: RegisterCodec,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pacing_ms: DEFAULT_PACING_MS,
            max_registers_per_write: MAX_REGISTERS_PER_WRITE,
            max_iterations: None,
            map: RegisterMapConfig::default(),
            codec: RegisterCodec::default(),
        }
    }
}

impl BridgeConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_REGISTERS_PER_WRITE).contains(&self.max_registers_per_write) {
            return Err(ConfigError::InvalidWriteChunk(self.max_registers_per_write));
        }
        Ok(())
    }
}
