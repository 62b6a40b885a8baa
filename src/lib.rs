//! course-delivery - Tiered access control for course media on a pay-per-GB CDN
//!
//! This crate provides upload, transcoding and streaming admission with:
//! - Swappable object storage backends (local filesystem, edge storage REST API)
//! - ffmpeg-driven quality variants and thumbnails
//! - Time-limited signed CDN URLs
//! - Per-tier bandwidth and concurrency quotas with a cost-driven emergency mode
//! - redb embedded catalog of uploaded assets

pub mod api;
pub mod config;
pub mod delivery;
pub mod media;
pub mod object_store;
pub mod policy;
pub mod signing;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod upload;

use config::Config;
use delivery::DeliveryService;
use object_store::StorageClient;
use storage::Database;
use upload::UploadOrchestrator;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub catalog: Database,
    pub storage: StorageClient,
    pub uploads: UploadOrchestrator,
    pub delivery: DeliveryService,
}
