//! VoiceRelay server binary entry point
//!
//! Runs the WebSocket bridge and the HTTP speech proxy side by side until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (bridge on 127.0.0.1:8765, proxy on 127.0.0.1:8080)
//! VOICERELAY_UPSTREAM_API_KEY=sk-... cargo run -p voicerelay-server
//!
//! # With a config file and JSON logs
//! cargo run -p voicerelay-server -- --config relay.toml --log-json
//!
//! # With logging
//! RUST_LOG=debug cargo run -p voicerelay-server
//! ```
//!
//! # Environment Variables
//!
//! - `VOICERELAY_CONFIG`: TOML config path
//! - `VOICERELAY_WS_ADDR` / `VOICERELAY_HTTP_ADDR`: listen addresses
//! - `VOICERELAY_UPSTREAM_URL`, `VOICERELAY_UPSTREAM_API_KEY`,
//!   `VOICERELAY_HTTP_BACKEND_URL`, `VOICERELAY_HTTP_BACKEND_API_KEY`:
//!   config overrides
//! - `RUST_LOG`: Logging level (default: `info`)

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicerelay_core::config::{
    RelayConfig, ENV_HTTP_BACKEND_API_KEY, ENV_HTTP_BACKEND_URL, ENV_UPSTREAM_API_KEY, ENV_UPSTREAM_URL,
};
use voicerelay_http::{HttpProxyServer, StreamingBackendClient};
use voicerelay_ws::BridgeServer;

/// VoiceRelay Server
///
/// Bridges WebSocket clients to a realtime speech upstream and proxies
/// chunked HTTP speech streams.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "VOICERELAY_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket bridge listen address
    #[arg(long, default_value = "127.0.0.1:8765", env = "VOICERELAY_WS_ADDR")]
    ws_addr: SocketAddr,

    /// HTTP proxy listen address
    #[arg(long, default_value = "127.0.0.1:8080", env = "VOICERELAY_HTTP_ADDR")]
    http_addr: SocketAddr,

    /// Do not start the HTTP proxy
    #[arg(long, default_value_t = false)]
    no_http: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "VOICERELAY_LOG_JSON")]
    log_json: bool,

    /// Realtime upstream URL (overrides config and environment)
    #[arg(long)]
    upstream_url: Option<String>,

    /// Realtime upstream API key (overrides config and environment)
    #[arg(long)]
    upstream_api_key: Option<String>,

    /// HTTP backend URL (overrides config and environment)
    #[arg(long)]
    http_backend_url: Option<String>,

    /// HTTP backend API key (overrides config and environment)
    #[arg(long)]
    http_backend_api_key: Option<String>,
}

impl Args {
    fn override_for(&self, key: &str) -> Option<String> {
        match key {
            ENV_UPSTREAM_URL => self.upstream_url.clone(),
            ENV_UPSTREAM_API_KEY => self.upstream_api_key.clone(),
            ENV_HTTP_BACKEND_URL => self.http_backend_url.clone(),
            ENV_HTTP_BACKEND_API_KEY => self.http_backend_api_key.clone(),
            _ => None,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("voicerelay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))?;

    info!("VoiceRelay server shutdown complete");
    Ok(())
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ws_addr = %args.ws_addr,
        http_addr = %args.http_addr,
        upstream = %config.upstream.url,
        http_backend = %config.http_backend.url,
        "VoiceRelay server starting"
    );
    if config.upstream.credential().is_err() {
        warn!("No upstream API key configured; bridge connections will be refused");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge = BridgeServer::bind(args.ws_addr, Arc::new(config.clone()))
        .await
        .context("failed to start WebSocket bridge")?;
    let mut bridge_task = Some(tokio::spawn(bridge.serve(shutdown_signal(shutdown_rx.clone()))));

    let mut proxy_task = if args.no_http {
        None
    } else {
        let backend = StreamingBackendClient::new(config.http_backend.clone())?;
        let proxy = HttpProxyServer::bind(args.http_addr, backend)
            .await
            .context("failed to start HTTP proxy")?;
        Some(tokio::spawn(proxy.serve(shutdown_signal(shutdown_rx))))
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Ctrl+C received, shutting down");
        }
        result = join_optional(&mut bridge_task) => {
            bridge_task = None;
            result??;
            warn!("WebSocket bridge stopped unexpectedly");
        }
        result = join_optional(&mut proxy_task) => {
            proxy_task = None;
            result??;
            warn!("HTTP proxy stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = bridge_task {
        task.await??;
    }
    if let Some(task) = proxy_task {
        task.await??;
    }

    Ok(())
}

/// File, then environment, then CLI flags
fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env();
    config.apply_overrides(|key| args.override_for(key));
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn join_optional<T>(task: &mut Option<tokio::task::JoinHandle<T>>) -> Result<T, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win() {
        let args = Args::parse_from([
            "voicerelay-server",
            "--upstream-url",
            "wss://cli.example/rt",
            "--http-backend-api-key",
            "sk-cli",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.upstream.url, "wss://cli.example/rt");
        assert_eq!(config.http_backend.credential(), Some("sk-cli"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["voicerelay-server", "--upstream-url", "http://not-a-socket"]);
        assert!(load_config(&args).is_err());
    }
}
