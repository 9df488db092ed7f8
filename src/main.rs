//! Entry point: parses configuration, loads the persisted registry, starts
//! the accept loop and heartbeat sweep, and saves the registry on shutdown
//! (§7).

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use naming_server::config::{Cli, Config};
use naming_server::dispatch::NamingServer;
use naming_server::{persistence, ss};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match Config::load(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let registry_path = config.registry_path();
    let store = match persistence::load(&registry_path) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, path = %registry_path.display(), "failed to load registry");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(source) => {
            error!(port = config.port, error = %source, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(port = config.port, "naming server listening");

    let heartbeat_interval = std::time::Duration::from_secs(config.heartbeat_interval_secs);
    let heartbeat_timeout = std::time::Duration::from_secs(config.heartbeat_timeout_secs);

    let server = NamingServer::new(config, store);
    let shutdown = Arc::new(Notify::new());

    let heartbeat_registry = Arc::clone(&server.ss_registry);
    tokio::spawn(ss::run_heartbeat_sweep(heartbeat_registry, heartbeat_interval, heartbeat_timeout));

    let accept_shutdown = Arc::clone(&shutdown);
    let accept_server = Arc::clone(&server);
    let accept_task = tokio::spawn(accept_server.run(listener, accept_shutdown));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    shutdown.notify_one();
    let _ = accept_task.await;

    server.broadcast_shutdown().await;
    if let Err(e) = persistence::save(&server.store, &server.config.registry_path()) {
        error!(error = %e, "failed to save registry on shutdown");
    }
    info!("naming server shut down cleanly");
}

/// Waits for Ctrl-C, SIGTERM, SIGHUP, or a `SHUTDOWN` line on stdin, whichever
/// arrives first (§6 Console/signals, §7).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {}
            _ = wait_for_shutdown_command() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = wait_for_shutdown_command() => {}
        }
    }
}

/// Reads stdin line by line until it sees the `SHUTDOWN` console command
/// (§6), or stdin closes, in which case it simply never resolves.
async fn wait_for_shutdown_command() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == "SHUTDOWN" => return,
            Ok(Some(_)) => continue,
            _ => std::future::pending::<()>().await,
        }
    }
}
