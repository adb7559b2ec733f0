//! gatehouse-server: tunnel admission gateway.
//!
//! Accepts WebSocket tunnel connections, proves the host identity,
//! authenticates peers against a local credential store or a remote
//! endpoint, and reverse-proxies every other HTTP request.

mod auth;
mod config;
mod handshake;
mod proxy;
mod server;
mod session;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::GatehouseServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// gatehouse-server: tunnel admission gateway
#[derive(Parser, Debug)]
#[command(name = "gatehouse-server", version, about = "Tunnel admission gateway")]
struct Cli {
    /// Listen interface
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.gatehouse/config.toml")]
    config: String,

    /// Seed for a deterministic host key (random key when empty)
    #[arg(long)]
    key: Option<String>,

    /// OpenSSH private key file used as the host key
    #[arg(long)]
    keyfile: Option<String>,

    /// JSON users file, `{"name:pass": ["addr-regex", ...]}`
    #[arg(long)]
    authfile: Option<String>,

    /// Single `name:pass` credential with unrestricted access
    #[arg(long)]
    auth: Option<String>,

    /// Verify credentials by POSTing them to this URL
    #[arg(long)]
    auth_url: Option<String>,

    /// PEM bundle of CAs trusted for --auth-url
    #[arg(long)]
    auth_url_ca_cert: Option<String>,

    /// Strip `@domain` from remotely verified usernames before the ACL lookup
    #[arg(long)]
    auth_url_assume_unique_usernames: bool,

    /// Backend URL for non-tunnel HTTP requests
    #[arg(long)]
    backend: Option<String>,

    /// Keep-alive ping interval in seconds (0 disables)
    #[arg(long)]
    keepalive: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting gatehouse-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        key_seed: cli.key,
        key_file: cli.keyfile,
        authfile: cli.authfile,
        auth: cli.auth,
        auth_url: cli.auth_url,
        auth_url_ca_cert: cli.auth_url_ca_cert,
        auth_url_assume_unique_usernames: cli.auth_url_assume_unique_usernames,
        proxy: cli.backend,
        keepalive: cli.keepalive,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match GatehouseServer::new(server_config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("gatehouse-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
