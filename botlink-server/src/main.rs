//! botlink relay server — entry point.
//!
//! ```text
//! botlink-server                     Serve with defaults
//! botlink-server --config <path>     Use custom config TOML
//! botlink-server --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use botlink_server::config::RelayConfig;
use botlink_server::signal::shutdown_signal;
use botlink_server::{AppState, http};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "botlink-server", about = "Robot video relay and control server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "botlink-server.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides config). Example: 0.0.0.0:5000
    #[arg(short, long)]
    listen: Option<String>,

    /// Robot control address (overrides config). Example: 192.168.2.34:8082
    #[arg(short, long)]
    robot: Option<String>,

    /// Upstream MJPEG URL (overrides config).
    #[arg(long)]
    video_url: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RelayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RelayConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.network.listen_address = listen;
    }
    if let Some(robot) = cli.robot {
        let (host, port) = robot
            .rsplit_once(':')
            .ok_or_else(|| format!("robot address must be HOST:PORT, got {robot}"))?;
        config.network.robot_host = host.to_string();
        config.network.robot_port = port.parse()?;
    }
    if let Some(url) = cli.video_url {
        config.network.video_url = url;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("botlink-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "robot control at {}:{}, video from {}",
        config.network.robot_host, config.network.robot_port, config.network.video_url
    );

    // ── 1. Components ───────────────────────────────────────────

    let listen_address = config.network.listen_address.clone();
    let auto_connect = config.control.auto_connect;
    let state = AppState::new(config)?;
    state.start_video().await;

    if auto_connect {
        if let Err(e) = state.connect_robot().await {
            warn!("initial robot connection failed: {e}");
        }
    }

    // ── 2. Serve ────────────────────────────────────────────────

    let listener = TcpListener::bind(&listen_address).await?;
    info!("listening on http://{}", listener.local_addr()?);

    let shutdown_state = state.clone();
    let served = axum::serve(listener, http::router(state.clone()))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Viewer streams never end by themselves; close them so the
            // server can drain.
            shutdown_state.shutdown().await;
        })
        .await;

    if let Err(e) = served {
        error!("HTTP server error: {e}");
    }

    // ── 3. Shutdown ─────────────────────────────────────────────

    state.shutdown().await;
    info!("bye");
    Ok(())
}
