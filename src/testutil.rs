//! Shared test helpers for in-crate router tests.

use std::sync::Arc;

use crate::config::{
    Config, DeliveryConfig, MediaConfig, NodeConfig, SigningConfig, StorageConfig,
};
use crate::delivery::{DeliveryService, GatewayEntitlements};
use crate::media::{FfmpegTranscoder, ThumbnailSettings, TranscodingPipeline};
use crate::object_store::{LocalStore, StorageClient};
use crate::policy::{AccessPolicyEngine, EmergencyState, FixedRevenue, LogNotifier, UsageTracker};
use crate::signing::UrlSigner;
use crate::storage::Database;
use crate::upload::{UploadLimits, UploadOrchestrator};
use crate::AppState;

pub const TEST_SECRET: &str = "test-token-secret";

/// Create a test AppState with a temporary catalog and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");
    let scratch_dir = temp_dir.path().join("scratch");

    let config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            public_base_url: "https://media.test".to_string(),
            ..StorageConfig::default()
        },
        signing: SigningConfig {
            cdn_base_url: "https://cdn.test".to_string(),
            token_secret: Some(TEST_SECRET.to_string()),
            default_ttl_seconds: 900,
        },
        media: MediaConfig {
            scratch_dir: scratch_dir.to_string_lossy().to_string(),
            ..MediaConfig::default()
        },
        upload_limits: UploadLimits::default(),
        delivery: DeliveryConfig {
            daily_revenue: Some(100.0),
            ..DeliveryConfig::default()
        },
        entitlement_url: None,
    };

    let catalog = Database::open(&data_dir).expect("Failed to open test catalog");
    let store = LocalStore::new(&files_dir).expect("Failed to create test object store");
    let storage = StorageClient::new(Arc::new(store), &config.storage.public_base_url);

    let pipeline = TranscodingPipeline::new(
        storage.clone(),
        Arc::new(FfmpegTranscoder::new("ffmpeg", "ffprobe")),
        &scratch_dir,
        ThumbnailSettings::default(),
    );
    let uploads = UploadOrchestrator::new(pipeline, catalog.clone(), config.upload_limits);

    let engine = Arc::new(AccessPolicyEngine::new(
        &config.delivery,
        Arc::new(EmergencyState::new()),
        Arc::new(UsageTracker::new()),
        Arc::new(FixedRevenue(100.0)),
        Arc::new(LogNotifier),
    ));
    let delivery = DeliveryService::new(
        engine,
        UrlSigner::new(config.signing.token_secret.clone(), 900),
        &config.signing.cdn_base_url,
        catalog.clone(),
        Arc::new(GatewayEntitlements),
    );

    Arc::new(AppState {
        config,
        catalog,
        storage,
        uploads,
        delivery,
    })
}
