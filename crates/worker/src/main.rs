//! `transcode-worker` -- remote transcoding worker daemon.
//!
//! Connects to the orchestrator over WebSocket, runs the transcode jobs
//! it is asked to run, reports their status, and periodically reports
//! CPU load. A small HTTP server exposes `GET /health`.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcode_core::benchmark::run_ops_benchmark;
use transcode_core::identity::WorkerIdentity;
use transcode_worker::config::WorkerConfig;
use transcode_worker::connection::OrchestratorClient;
use transcode_worker::health;
use transcode_worker::sampler::{spawn_sampler, CpuSampler};
use transcode_worker::worker::Worker;

/// How long to wait for each background task after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcode_worker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let identity = WorkerIdentity::generate(config.host.clone());
    tracing::info!(
        worker_id = %identity.worker_id,
        host = %identity.host,
        orchestrator = %config.orchestrator_url,
        transcoder = %config.transcoder_binary().display(),
        hwaccel = ?config.hwaccel,
        "Starting transcode-worker",
    );

    // --- Throughput benchmark (before accepting any work) ---
    let benchmark_duration = config.benchmark_duration;
    let ops = match tokio::task::spawn_blocking(move || run_ops_benchmark(benchmark_duration)).await
    {
        Ok(ops) => ops,
        Err(e) => {
            tracing::error!(error = %e, "Benchmark task failed");
            std::process::exit(1);
        }
    };
    tracing::info!(ops, duration_ms = benchmark_duration.as_millis() as u64, "Benchmark complete");

    let cancel = CancellationToken::new();

    // --- Control flow ---
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (worker, worker_rx) = Worker::new(Arc::clone(&config), ops, outbound_tx);
    let events = worker.events();
    let worker_handle = tokio::spawn(worker.run(worker_rx, cancel.clone()));

    // --- CPU sampler ---
    let sampler_handle = spawn_sampler(
        CpuSampler::new(config.cpu_sample_interval),
        events.clone(),
        cancel.clone(),
    );

    // --- Health endpoint ---
    let addr = match config.listen_host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, config.listen_port),
        Err(e) => {
            tracing::error!(error = %e, host = %config.listen_host, "Invalid LISTENING_HOST");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind health endpoint");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Health endpoint listening");
    let health_cancel = cancel.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::serve(listener, health_cancel).await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // --- Orchestrator connection ---
    let client = OrchestratorClient::new(config.orchestrator_ws_url(), identity);
    let connection_cancel = cancel.clone();
    let connection_handle = tokio::spawn(async move {
        client.run(events, outbound_rx, connection_cancel).await;
    });

    shutdown_signal().await;
    cancel.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, connection_handle).await;
    tracing::info!("Orchestrator connection closed");
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, worker_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, sampler_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, health_handle).await;

    tracing::info!("Shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
