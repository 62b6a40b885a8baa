use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_delivery::{
    api,
    config::{Config, StorageBackend},
    delivery::{DeliveryService, Entitlements, GatewayEntitlements, RemoteEntitlements},
    media::{FfmpegTranscoder, ThumbnailSettings, TranscodingPipeline},
    object_store as obj,
    policy::{
        AccessPolicyEngine, EmergencyState, FixedRevenue, LogNotifier, NoRevenue, RevenueSource,
        UsageTracker,
    },
    signing::UrlSigner,
    storage::Database,
    upload::UploadOrchestrator,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "course-delivery starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize catalog
    let catalog = Database::open(&config.node.data_dir)?;
    info!("Catalog opened at: {}", config.node.data_dir);

    // Initialize object store backend
    let object_store: Arc<dyn obj::ObjectStore> = match config.storage.backend {
        StorageBackend::Local => {
            let store = obj::LocalStore::new(&config.storage.local_storage_path)?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            Arc::new(store)
        }
        StorageBackend::Edge => {
            let (Some(zone), Some(access_key)) = (
                config.storage.storage_zone.as_deref(),
                config.storage.access_key.as_deref(),
            ) else {
                anyhow::bail!("edge storage requires STORAGE_ZONE and STORAGE_ACCESS_KEY");
            };
            let store = obj::EdgeStore::new(
                config.storage.region,
                zone,
                access_key,
                config.storage.max_retries,
            )?;
            info!(
                zone,
                endpoint = config.storage.region.endpoint(),
                "Using edge storage backend"
            );
            Arc::new(store)
        }
    };
    let storage = obj::StorageClient::new(object_store, &config.storage.public_base_url);

    // Media pipeline and upload orchestration
    let transcoder = Arc::new(FfmpegTranscoder::new(
        &config.media.ffmpeg_path,
        &config.media.ffprobe_path,
    ));
    let pipeline = TranscodingPipeline::new(
        storage.clone(),
        transcoder,
        &config.media.scratch_dir,
        ThumbnailSettings {
            offset: config.media.thumbnail_offset,
            width: config.media.thumbnail_width,
            height: config.media.thumbnail_height,
        },
    );
    let uploads = UploadOrchestrator::new(pipeline, catalog.clone(), config.upload_limits);

    // Access policy
    let revenue: Arc<dyn RevenueSource> = match config.delivery.daily_revenue {
        Some(amount) => Arc::new(FixedRevenue(amount)),
        None => {
            tracing::warn!("DAILY_REVENUE is not set; the cost monitor will not run");
            Arc::new(NoRevenue)
        }
    };
    let engine = Arc::new(AccessPolicyEngine::new(
        &config.delivery,
        Arc::new(EmergencyState::new()),
        Arc::new(UsageTracker::new()),
        revenue,
        Arc::new(LogNotifier),
    ));

    let entitlements: Arc<dyn Entitlements> = match config.entitlement_url.as_deref() {
        Some(url) => {
            info!(url, "Checking entitlements remotely");
            Arc::new(RemoteEntitlements::new(url)?)
        }
        None => Arc::new(GatewayEntitlements),
    };

    let signer = UrlSigner::new(
        config.signing.token_secret.clone(),
        config.signing.default_ttl_seconds,
    );
    let delivery = DeliveryService::new(
        Arc::clone(&engine),
        signer,
        &config.signing.cdn_base_url,
        catalog.clone(),
        entitlements,
    );

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        catalog,
        storage,
        uploads,
        delivery,
    });

    let monitor = tokio::spawn(run_monitor(Arc::clone(&state)));

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background tasks");
    monitor.abort();

    // Commit usage of streams still open
    let reaped = state.delivery.reap_idle_sessions(chrono::Duration::zero());
    info!(sessions = reaped.len(), "Shutdown complete");
    Ok(())
}

/// Periodic cost check, idle-session reaping and pruning of old usage counters.
async fn run_monitor(state: Arc<AppState>) {
    let delivery_config = &state.config.delivery;
    let idle_timeout = chrono::Duration::seconds(delivery_config.session_idle_timeout_seconds);
    let mut interval =
        tokio::time::interval(Duration::from_secs(delivery_config.monitor_interval_seconds.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let engine = state.delivery.engine();

        if delivery_config.daily_revenue.is_some() {
            match engine.monitor_daily_costs().await {
                Ok(report) => tracing::debug!(
                    status = ?report.status,
                    ratio = report.ratio,
                    "Cost monitor completed"
                ),
                Err(e) => tracing::error!(error = %e, "Cost monitor failed"),
            }
        }

        state.delivery.reap_idle_sessions(idle_timeout);

        let yesterday = chrono::Utc::now().date_naive() - chrono::Duration::days(1);
        let pruned = engine.usage().prune_before(yesterday);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned old usage counters");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
