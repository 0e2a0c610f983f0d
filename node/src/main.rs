// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Node
//!
//! Entry point for the `custody-node` binary. Parses CLI arguments,
//! initializes logging and metrics, builds the custodian, and serves the
//! HTTP/JSON-RPC/WebSocket API.
//!
//! The binary supports five subcommands:
//!
//! - `run`: start the node
//! - `init`: write a ledger config file
//! - `status`: query a running node's status endpoint
//! - `balance`: query one account on a running node
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;

use custody_contracts::Custodian;
use custody_protocol::config::PROTOCOL_VERSION;
use custody_protocol::LedgerConfig;

use cli::{Commands, CustodyNodeCli};
use logging::{LogFormat, DEFAULT_DIRECTIVE};
use metrics::LedgerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CustodyNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_config(args),
        Commands::Status(args) => query(&args.rpc_url, "/status").await,
        Commands::Balance(args) => {
            query(&args.rpc_url, &format!("/accounts/{}", args.address)).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: API server and metrics endpoint, until a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_DIRECTIVE, LogFormat::from_str_lossy(&args.log_format))
        .context("failed to initialize logging")?;

    let config = args.resolve_config()?;
    tracing::info!(
        withdrawal_limit = config.withdrawal_limit,
        capacity = config.capacity,
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        faucet = !args.no_faucet,
        "starting custody-node"
    );

    let node_metrics =
        Arc::new(LedgerMetrics::new().context("failed to register prometheus metrics")?);
    let custodian = Arc::new(Custodian::from_config(&config));

    let app_state = api::AppState::new(
        format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        Arc::clone(&custodian),
        Arc::clone(&node_metrics),
        !args.no_faucet,
    );

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    let audit = custodian.audit();
    tracing::info!(
        total_deposited = audit.ledger.total_deposited,
        custody = audit.custody,
        healthy = audit.is_healthy(),
        "custody-node stopped"
    );
    Ok(())
}

/// Writes a validated ledger config file.
fn init_config(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("custody_node=info", LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let path = &args.output;
    if path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }

    let config = LedgerConfig::new(args.withdrawal_limit, args.capacity);
    config.validate().context("invalid ledger parameters")?;
    config
        .save(path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;

    tracing::info!(path = %path.display(), "ledger config written");

    println!("Config written successfully.");
    println!("  Path             : {}", path.display());
    println!("  Withdrawal limit : {}", config.withdrawal_limit);
    println!("  Capacity         : {}", config.capacity);

    Ok(())
}

/// GETs `path` from a running node and prints the body.
async fn query(rpc_url: &str, path: &str) -> Result<()> {
    let endpoint = Endpoint::parse(rpc_url)?;
    let (status, body) = http_get(&endpoint, path).await?;
    println!("{}", body);
    if !(200..300).contains(&status) {
        bail!("node answered with HTTP {}", status);
    }
    Ok(())
}

/// Host and port of a node's HTTP API.
#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `http://host[:port][/...]`. The scheme is optional; any path is
    /// dropped.
    fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("http://")
            .unwrap_or(url)
            .trim_end_matches('/');
        if rest.starts_with("https://") {
            bail!("https is not supported: {}", url);
        }

        let authority = rest.split('/').next().unwrap_or(rest);
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("bad port in {}", url))?;
                (host, port)
            }
            None => (authority, 80),
        };
        if host.is_empty() {
            bail!("missing host in {}", url);
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Plain HTTP/1.1 GET over a tokio TCP stream. Returns (status, body).
async fn http_get(endpoint: &Endpoint, path: &str) -> Result<(u16, String)> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, endpoint.host,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    parse_response(&String::from_utf8_lossy(&buf))
}

/// Splits a raw HTTP/1.1 response into status code and body.
fn parse_response(raw: &str) -> Result<(u16, String)> {
    let (head, body) = raw
        .split_once("\r\n\r\n")
        .context("malformed HTTP response")?;
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .context("missing HTTP status line")?;
    Ok((status, body.to_string()))
}

/// Prints version information to stdout.
fn print_version() {
    println!("custody-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
    println!("rustc        {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parses_common_forms() {
        assert_eq!(
            Endpoint::parse("http://127.0.0.1:9841").unwrap(),
            Endpoint {
                host: "127.0.0.1".into(),
                port: 9841
            }
        );
        assert_eq!(
            Endpoint::parse("localhost:8080/").unwrap(),
            Endpoint {
                host: "localhost".into(),
                port: 8080
            }
        );
        assert_eq!(Endpoint::parse("http://node.internal").unwrap().port, 80);
    }

    #[test]
    fn endpoint_rejects_bad_input() {
        assert!(Endpoint::parse("https://secure:443").is_err());
        assert!(Endpoint::parse("http://:9841").is_err());
        assert!(Endpoint::parse("http://host:notaport").is_err());
    }

    #[test]
    fn response_parsing_extracts_status_and_body() {
        let raw = concat!(
            "HTTP/1.1 422 Unprocessable Entity\r\n",
            "content-type: application/json\r\n\r\n",
            "{\"code\":\"x\"}"
        );
        let (status, body) = parse_response(raw).unwrap();
        assert_eq!(status, 422);
        assert_eq!(body, "{\"code\":\"x\"}");

        assert!(parse_response("garbage").is_err());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("ledger.json");
        LedgerConfig::new(1, 2).save(&output).unwrap();

        let args = cli::InitArgs {
            output: output.clone(),
            withdrawal_limit: 10,
            capacity: 100,
            force: false,
        };
        assert!(init_config(args).is_err());
        assert_eq!(LedgerConfig::load(&output).unwrap(), LedgerConfig::new(1, 2));
    }
}
