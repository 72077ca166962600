//! Checkout reconciler - suspect-item detection for self-checkout lanes
//!
//! Reconciles POS scans against scale, CV and RFID evidence for one lane
//! and reports unresolved evidence when payment starts.
//!
//! Module structure:
//! - `domain/` - Readings, RTTL ledger, catalog, snapshots
//! - `io/` - External interfaces (MQTT ingest/egress, HTTP, notifier)
//! - `services/` - Reconciliation logic (Session, scale, CV, RFID)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use checkout_reconciler::domain::{JsonFileCatalog, Sgtin96Decoder};
use checkout_reconciler::infra::{Config, Metrics};
use checkout_reconciler::io::{
    create_egress_channel, report_metrics, EgressNotifier, HttpContext, HttpNotifier,
    MqttPublisher, Notifier, NotifierSet,
};
use checkout_reconciler::services::{Collaborators, Session, SessionSettings};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Checkout reconciler - suspect-item detection for self-checkout lanes
#[derive(Parser, Debug)]
#[command(name = "checkout-reconciler", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("RECONCILER_GIT_HASH"), "checkout-reconciler starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    if let Err(e) = checkout_reconciler::infra::broker::start_embedded_broker(&config) {
        error!(error = %e, "broker_start_failed");
    }

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        devices = ?config.devices(),
        scale_to_scale_tolerance = %config.scale_to_scale_tolerance(),
        cv_time_alignment_ms = %config.cv_time_alignment_ms(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let catalog = JsonFileCatalog::from_file(config.catalog_file())?;
    info!(file = %config.catalog_file(), products = %catalog.len(), "catalog_loaded");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Create reading channel (bounded for backpressure)
    let (reading_tx, reading_rx) = mpsc::channel(1000);

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = checkout_reconciler::io::start_mqtt_client(
            &mqtt_config,
            reading_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            error!(error = %e, "MQTT client error");
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Start metrics reporter. Each tick drains the periodic counters once
    // and hands the same summary to the log and the metrics topic.
    let metrics_clone = metrics.clone();
    let metrics_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            report_metrics(&metrics_clone, metrics_egress.as_ref());
        }
    });

    // Suspect lists go to every configured sink
    let mut notifiers = NotifierSet::new();
    if let Some(url) = config.notifier_url() {
        notifiers = notifiers.with(Arc::new(HttpNotifier::new(url)?));
        info!(url = %url, "http_notifier_enabled");
    }
    if let Some(sender) = &egress_sender {
        notifiers = notifiers.with(Arc::new(EgressNotifier::new(sender.clone())));
    }
    if notifiers.is_empty() {
        warn!("no suspect notifier configured");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(notifiers);

    let collaborators =
        Collaborators { catalog: Arc::new(catalog), epc: Arc::new(Sgtin96Decoder), notifier };
    let mut session = Session::new(
        SessionSettings::from_config(&config),
        collaborators,
        metrics.clone(),
        egress_sender,
    );

    // Start HTTP status server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let ctx = HttpContext {
            metrics: metrics.clone(),
            state: session.state_handle(),
            site_id: Arc::new(config.site_id().to_string()),
        };
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                checkout_reconciler::io::start_http_server(http_port, ctx, http_shutdown).await
            {
                error!(error = %e, "HTTP server error");
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run session - consumes readings until shutdown or the channel closes
    session.run(reading_rx, shutdown_rx).await;

    info!("checkout-reconciler shutdown complete");
    Ok(())
}
