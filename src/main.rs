//! spagate - Multi-tenant reverse proxy for single-page applications
//!
//! Routes each request to a tenant origin by Host header, serves static assets
//! verbatim, falls back to `index.html` for client-side routes and applies a
//! fixed Cache-Control policy.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use spagate_server::{AccessLog, DecorationMode, ProxyServer, ProxyServerConfig, ResponseTiming};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// spagate - Serve many single-page applications from one listener
#[derive(Parser, Debug)]
#[command(name = "spagate")]
#[command(about = "Multi-tenant reverse proxy for single-page applications", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "SPAGATE_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Tenant table (YAML or JSON) mapping hosts to origins
    #[arg(long, env = "SPAGATE_TENANTS", default_value = "tenants.yaml")]
    tenants: PathBuf,

    /// Readiness sentinel file; /readyz reports ready while it exists
    #[arg(long, env = "READY_FILE", default_value = "ready")]
    ready_file: PathBuf,

    /// Upstream timeout in seconds (connect + response headers)
    #[arg(long, env = "SPAGATE_UPSTREAM_TIMEOUT", default_value = "30")]
    upstream_timeout: u64,

    /// Apply the asset/document Cache-Control to upstream 404 responses too
    #[arg(long, env = "SPAGATE_CACHE_NOT_FOUND")]
    cache_not_found: bool,

    /// Disable the per-request access log
    #[arg(long)]
    no_access_log: bool,

    /// Do not add the X-Response-Time header
    #[arg(long)]
    no_response_time: bool,

    /// Log output format
    #[arg(long, env = "SPAGATE_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

impl Cli {
    fn server_config(&self) -> Result<ProxyServerConfig> {
        if self.upstream_timeout == 0 {
            anyhow::bail!("--upstream-timeout must be at least 1 second");
        }

        let decoration_mode = if self.cache_not_found {
            DecorationMode::Always
        } else {
            DecorationMode::SkipNotFound
        };

        Ok(ProxyServerConfig {
            bind_addr: self.bind,
            ready_file: self.ready_file.clone(),
            upstream_timeout: Duration::from_secs(self.upstream_timeout),
            decoration_mode,
        })
    }
}

/// Setup logging; `RUST_LOG` takes precedence over `--verbose`
fn setup_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .init(),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let server_config = cli.server_config()?;

    // The only fatal startup condition: no usable tenant table
    let registry = config::load_registry(&cli.tenants)?;
    if registry.is_empty() {
        warn!("Tenant table {:?} defines no tenants; all traffic goes to the default origin", cli.tenants);
    }
    for host in registry.hosts() {
        info!("Tenant {} -> {}", host, registry.lookup(Some(host)));
    }

    info!("Readiness sentinel: {}", server_config.ready_file.display());
    info!("Upstream timeout: {:?}", server_config.upstream_timeout);
    info!("Cache-Control mode: {:?}", server_config.decoration_mode);

    let mut server = ProxyServer::new(server_config, registry);
    if !cli.no_access_log {
        server = server.with_interceptor(AccessLog);
    }
    if !cli.no_response_time {
        server = server.with_interceptor(ResponseTiming);
    }

    server
        .start_with_shutdown(shutdown_signal())
        .await
        .context("Proxy server failed")?;

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_format);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
