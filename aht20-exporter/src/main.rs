//! Prometheus exporter for AHT20 sensors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use aht20_exporter::bus;
use aht20_exporter::{
    ExporterArgs, ExporterConfig, GaugeSet, HttpServer, SensorPoller, SensorRegistry,
    init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ExporterArgs::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        ExporterConfig::default()
    };

    // CLI and environment take precedence over the file
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting AHT20 exporter");

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gauges = Arc::new(GaugeSet::new(config.prometheus.prefix.clone()));

    // Expose metrics before touching the bus
    let http_server = HttpServer::new(
        gauges.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let listener = http_server.bind().await?;
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Sensor construction does blocking bus I/O
    let requested = config.sensors.count;
    let factory = bus::sensor_factory(&config.sensors.bus);
    let registry =
        match tokio::task::spawn_blocking(move || SensorRegistry::build(requested, &*factory))
            .await?
        {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, requested, "No sensor could be initialized, exiting");
                let _ = shutdown_tx.send(true);
                let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;
                return Err(e.into());
            }
        };

    info!(
        sensors = registry.len(),
        adapter = config.sensors.bus.adapter,
        simulate = config.sensors.bus.simulate,
        "Sensors ready"
    );

    let poller = SensorPoller::new(registry, gauges.clone(), config.poll.interval());
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    shutdown_signal().await;

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = gauges.stats();
    info!(
        polls = stats.polls,
        reads_succeeded = stats.reads_succeeded,
        reads_failed_transient = stats.reads_failed_transient,
        reads_failed_unexpected = stats.reads_failed_unexpected,
        series_count = gauges.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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
