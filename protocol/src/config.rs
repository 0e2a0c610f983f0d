//! # Ledger Configuration & Constants
//!
//! Every tunable number for the custody ledger lives here, together with the
//! on-disk [`LedgerConfig`] format the node reads at startup.
//!
//! The two ledger parameters are fixed for the lifetime of a ledger. Once a
//! ledger is constructed from a config, editing the file changes nothing
//! until the next process start.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version string reported by the node's `/status` endpoint and `version` command.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Ledger Parameters
// ---------------------------------------------------------------------------

/// Default ceiling on a single withdrawal, in the smallest value unit.
pub const DEFAULT_WITHDRAWAL_LIMIT: u64 = 1_000_000;

/// Default ceiling on the total value the ledger may hold.
pub const DEFAULT_CAPACITY: u64 = 100_000_000;

// ---------------------------------------------------------------------------
// Node Parameters
// ---------------------------------------------------------------------------

/// Default HTTP / JSON-RPC API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Broadcast channel capacity for live ledger events. Slow WebSocket
/// subscribers that fall further behind than this start losing events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default config file name inside the node's data directory.
pub const CONFIG_FILE_NAME: &str = "ledger.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while loading, saving, or validating a [`LedgerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the config file failed.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`LedgerConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A ledger with zero capacity can never accept a deposit.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    /// A ledger with a zero withdrawal limit can never release funds.
    #[error("withdrawal limit must be greater than zero")]
    ZeroWithdrawalLimit,
}

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Construction parameters for a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum value movable in one withdrawal.
    pub withdrawal_limit: u64,
    /// Maximum total value the ledger may hold.
    pub capacity: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            withdrawal_limit: DEFAULT_WITHDRAWAL_LIMIT,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl LedgerConfig {
    /// Creates a config with explicit parameters.
    pub fn new(withdrawal_limit: u64, capacity: u64) -> Self {
        Self {
            withdrawal_limit,
            capacity,
        }
    }

    /// Rejects parameter combinations that produce an unusable ledger.
    ///
    /// A withdrawal limit above capacity is legal: the limit simply never
    /// binds before the balance check does.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.withdrawal_limit == 0 {
            return Err(ConfigError::ZeroWithdrawalLimit);
        }
        if self.withdrawal_limit > self.capacity {
            tracing::warn!(
                withdrawal_limit = self.withdrawal_limit,
                capacity = self.capacity,
                "withdrawal limit exceeds capacity and will never bind"
            );
        }
        Ok(())
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: LedgerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes this config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.withdrawal_limit <= config.capacity);
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = LedgerConfig::new(10, 0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity));
    }

    #[test]
    fn zero_withdrawal_limit_rejected() {
        let err = LedgerConfig::new(0, 10).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWithdrawalLimit));
    }

    #[test]
    fn limit_above_capacity_is_allowed() {
        assert!(LedgerConfig::new(500, 100).validate().is_ok());
    }

    #[test]
    fn save_then_load_preserves_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = LedgerConfig::new(100, 1000);
        config.save(&path).unwrap();

        let loaded = LedgerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"withdrawal_limit": 5, "capacity": 0}"#).unwrap();
        assert!(matches!(
            LedgerConfig::load(&path),
            Err(ConfigError::ZeroCapacity)
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            LedgerConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LedgerConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
