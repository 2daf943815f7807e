use anyhow::Result;
use detection_monitor::audio::{default_backend, ToneEngine};
use detection_monitor::capture::{frame_source_from_config, CaptureSession, CaptureThrottle};
use detection_monitor::config::{self, Config};
use detection_monitor::detector::{DetectionBackend, HttpDetectionClient};
use detection_monitor::messaging::amqp::spawn_amqp_listener;
use detection_monitor::messaging::broker::{create_event_broker, MessageBrokerTrait};
use detection_monitor::messaging::{AlertEvents, EventType};
use detection_monitor::models::ModelSelection;
use detection_monitor::services::{AlertService, AnalyticsAggregator, AnalyticsService};
use detection_monitor::storage::AlertStore;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BROKER_CAPACITY: usize = 256;

async fn start_capture(
    config: &Config,
    client: Arc<HttpDetectionClient>,
    alert_service: Arc<AlertService>,
    events: AlertEvents,
) -> Option<Arc<CaptureSession>> {
    if !config.capture.enabled {
        return None;
    }
    let Some(source_config) = &config.capture.source else {
        warn!("Capture enabled but no frame source configured");
        return None;
    };

    // The single-model endpoint runs whichever model the service has selected
    match &config.capture.model {
        ModelSelection::Single(model) => {
            if let Err(e) = client.switch_model(model).await {
                warn!("Failed to switch detector to {}: {}", model, e);
            }
        }
        ModelSelection::Fight => {
            if let Err(e) = client.reset_fight_buffer().await {
                warn!("Failed to reset fight buffer: {}", e);
            }
        }
        ModelSelection::Dual => {}
    }
    let backend: Arc<dyn DetectionBackend> = client;

    let tones = alert_service.tones().clone();
    let throttle = CaptureThrottle::new(backend, alert_service, config.capture.camera_name.clone())
        .with_events(events);

    match throttle
        .start(
            config.capture.interval(),
            frame_source_from_config(source_config),
            config.capture.model.clone(),
        )
        .await
    {
        Ok(session) => {
            tones.play_system_cue();
            Some(session)
        }
        Err(e) => {
            error!("Failed to start capture: {}", e);
            None
        }
    }
}

async fn run_app(config: Config) -> Result<()> {
    info!("Starting detection monitor");

    // Create message broker
    let message_broker = create_event_broker(BROKER_CAPACITY);
    let events = AlertEvents::new(message_broker.clone());

    // Publish system startup event
    if let Err(e) = message_broker
        .publish(
            EventType::SystemStartup,
            None,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        )
        .await
    {
        warn!("Failed to publish system startup event: {}", e);
    }

    let tones = Arc::new(ToneEngine::new(default_backend(), &config.audio));
    tones.init();

    let store = AlertStore::new(&config.alerts.store_path, config.alerts.max_alerts);
    let alert_service = Arc::new(
        AlertService::new(config.alerts.max_alerts, events.clone(), tones.clone()).with_store(store),
    );
    alert_service.restore().await;

    let client = Arc::new(HttpDetectionClient::new(&config.detector)?);
    let backend: Arc<dyn DetectionBackend> = client.clone();
    match backend.models().await {
        Ok(catalog) => info!(
            "Detector models: {:?} (current: {:?})",
            catalog.models, catalog.current_model
        ),
        Err(e) => warn!("Detector not reachable yet: {}", e),
    }

    let snapshot_poller = alert_service.clone().start_snapshot_poller(
        backend.clone(),
        Duration::from_secs(config.alerts.snapshot_interval_secs),
        config.detector.history_limit,
    );
    info!("Snapshot poller started");

    let analytics = Arc::new(AnalyticsService::new(
        AnalyticsAggregator::new(config.analytics.default_range, config.analytics.recent_limit)
            .with_history_limit(config.detector.history_limit),
        message_broker.clone(),
    ));
    analytics.clone().follow_alerts().await?;
    let analytics_refresh = analytics.clone().start(
        backend.clone(),
        Duration::from_secs(config.analytics.refresh_interval_secs),
        config.detector.history_limit,
    );
    info!("Analytics service started");

    let push_listener = if config.push.enabled {
        info!("Push delivery enabled via {}", config.push.exchange);
        Some(spawn_amqp_listener(config.push.clone(), alert_service.clone()))
    } else {
        None
    };

    let session = start_capture(&config, client, alert_service.clone(), events).await;

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if let Some(session) = session {
        session.stop().await;
    }
    snapshot_poller.abort();
    analytics_refresh.abort();
    if let Some(listener) = push_listener {
        listener.abort();
    }
    tones.dispose();

    // Publish a system shutdown event
    if let Err(e) = message_broker
        .publish(
            EventType::SystemShutdown,
            None,
            serde_json::json!({"reason": "Normal shutdown"}),
        )
        .await
    {
        error!("Failed to publish shutdown event: {}", e);
    }

    message_broker.shutdown().await;
    info!(
        "Unread alerts at shutdown: {}",
        alert_service.unread_count().await
    );

    Ok(())
}

fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging; RUST_LOG overrides the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app(config)) {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
