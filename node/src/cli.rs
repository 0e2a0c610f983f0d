//! # CLI Interface
//!
//! Defines the command-line argument structure for `custody-node` using
//! `clap` derive. Supports five subcommands: `run`, `init`, `status`,
//! `balance`, and `version`.
//!
//! Ledger parameters resolve in three layers: an explicit flag (or its
//! `CUSTODY_*` environment variable) wins over the config file, which wins
//! over the built-in defaults.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use custody_protocol::config::{
    CONFIG_FILE_NAME, DEFAULT_CAPACITY, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT,
    DEFAULT_WITHDRAWAL_LIMIT,
};
use custody_protocol::{Address, LedgerConfig};

/// Custody ledger node.
///
/// Hosts a single custodian and serves its deposit, withdrawal and balance
/// operations over REST, JSON-RPC and WebSocket, with Prometheus metrics on
/// a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "custody-node",
    about = "Custody ledger node",
    version,
    propagate_version = true
)]
pub struct CustodyNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the custody node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Write a ledger config file with the given (or default) parameters.
    Init(InitArgs),
    /// Query the status of a running node.
    Status(StatusArgs),
    /// Query one account's balance on a running node.
    Balance(BalanceArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the ledger config file (JSON).
    #[arg(long, short = 'c', env = "CUSTODY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Largest amount a single withdrawal may move. Overrides the config file.
    #[arg(long, env = "CUSTODY_WITHDRAWAL_LIMIT")]
    pub withdrawal_limit: Option<u64>,

    /// Most value the pool may hold. Overrides the config file.
    #[arg(long, env = "CUSTODY_CAPACITY")]
    pub capacity: Option<u64>,

    /// Port for the JSON-RPC and REST API.
    #[arg(long, env = "CUSTODY_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CUSTODY_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "CUSTODY_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Disable the `/wallets/:address/fund` faucet endpoint.
    #[arg(long, env = "CUSTODY_NO_FAUCET")]
    pub no_faucet: bool,
}

impl RunArgs {
    /// Builds the effective ledger config: defaults, then the config file,
    /// then any flags given on the command line.
    pub fn resolve_config(&self) -> Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => LedgerConfig::default(),
        };

        if let Some(limit) = self.withdrawal_limit {
            config.withdrawal_limit = limit;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }

        config.validate().context("invalid ledger parameters")?;
        Ok(config)
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the config file.
    #[arg(long, short = 'o', default_value = CONFIG_FILE_NAME)]
    pub output: PathBuf,

    /// Per-withdrawal ceiling to record.
    #[arg(long, default_value_t = DEFAULT_WITHDRAWAL_LIMIT)]
    pub withdrawal_limit: u64,

    /// Pool capacity to record.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub capacity: u64,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// RPC endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}

/// Arguments for the `balance` subcommand.
#[derive(Parser, Debug)]
pub struct BalanceArgs {
    /// Account address, `0x`-prefixed hex.
    pub address: Address,

    /// RPC endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["custody-node", "run"];
        argv.extend_from_slice(extra);
        match CustodyNodeCli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn verify_cli_structure() {
        CustodyNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_resolve_to_default_config() {
        let args = run_args(&[]);
        assert_eq!(args.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert!(!args.no_faucet);
        assert_eq!(args.resolve_config().unwrap(), LedgerConfig::default());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        LedgerConfig::new(50, 5_000).save(&path).unwrap();

        let path_arg = path.to_string_lossy().into_owned();
        let args = run_args(&["--config", path_arg.as_str(), "--capacity", "9000"]);
        let config = args.resolve_config().unwrap();

        assert_eq!(config.withdrawal_limit, 50);
        assert_eq!(config.capacity, 9_000);
    }

    #[test]
    fn zero_capacity_flag_is_rejected() {
        let args = run_args(&["--capacity", "0"]);
        assert!(args.resolve_config().is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = run_args(&["--config", "/nonexistent/ledger.json"]);
        let err = args.resolve_config().unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }

    #[test]
    fn balance_parses_address() {
        let addr = Address::repeat_byte(0x0A).to_string();
        let cli =
            CustodyNodeCli::try_parse_from(["custody-node", "balance", addr.as_str()]).unwrap();
        match cli.command {
            Commands::Balance(args) => assert_eq!(args.address, Address::repeat_byte(0x0A)),
            other => panic!("expected balance, got {:?}", other),
        }
    }

    #[test]
    fn balance_rejects_malformed_address() {
        assert!(CustodyNodeCli::try_parse_from(["custody-node", "balance", "0x1234"]).is_err());
    }
}
