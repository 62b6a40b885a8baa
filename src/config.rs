use thiserror::Error;

use crate::policy::{EmergencyCeilings, QuotaTable, Tier};
use crate::upload::UploadLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub signing: SigningConfig,
    pub media: MediaConfig,
    pub upload_limits: UploadLimits,
    pub delivery: DeliveryConfig,
    /// Entitlement endpoint. When unset the upstream gateway is trusted.
    pub entitlement_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Edge,
    Local,
}

/// Edge storage regions. The primary region has no host prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageRegion {
    #[default]
    Falkenstein,
    NewYork,
    LosAngeles,
    Singapore,
    Sydney,
    London,
    Stockholm,
    SaoPaulo,
    Johannesburg,
}

impl StorageRegion {
    pub fn endpoint(self) -> &'static str {
        match self {
            StorageRegion::Falkenstein => "storage.bunnycdn.com",
            StorageRegion::NewYork => "ny.storage.bunnycdn.com",
            StorageRegion::LosAngeles => "la.storage.bunnycdn.com",
            StorageRegion::Singapore => "sg.storage.bunnycdn.com",
            StorageRegion::Sydney => "syd.storage.bunnycdn.com",
            StorageRegion::London => "uk.storage.bunnycdn.com",
            StorageRegion::Stockholm => "se.storage.bunnycdn.com",
            StorageRegion::SaoPaulo => "br.storage.bunnycdn.com",
            StorageRegion::Johannesburg => "jh.storage.bunnycdn.com",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "" | "de" | "falkenstein" => Some(StorageRegion::Falkenstein),
            "ny" => Some(StorageRegion::NewYork),
            "la" => Some(StorageRegion::LosAngeles),
            "sg" => Some(StorageRegion::Singapore),
            "syd" => Some(StorageRegion::Sydney),
            "uk" => Some(StorageRegion::London),
            "se" => Some(StorageRegion::Stockholm),
            "br" => Some(StorageRegion::SaoPaulo),
            "jh" => Some(StorageRegion::Johannesburg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// Storage zone name (required when backend is edge)
    pub storage_zone: Option<String>,
    /// Storage zone password sent as the `AccessKey` header
    pub access_key: Option<String>,
    pub region: StorageRegion,
    /// Public pull-zone URL used to build object URLs
    pub public_base_url: String,
    /// Retries for transient (5xx / transport) failures
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub cdn_base_url: String,
    /// Token authentication key shared with the CDN edge.
    pub token_secret: Option<String>,
    pub default_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Where spooled uploads and encoder intermediates live.
    pub scratch_dir: String,
    /// Fraction of the duration at which the thumbnail frame is grabbed.
    pub thumbnail_offset: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub quotas: QuotaTable,
    pub emergency_ceilings: EmergencyCeilings,
    /// Delivery cost in revenue currency per GB transferred.
    pub cost_per_gb: f64,
    pub cost_warning_ratio: f64,
    pub cost_emergency_ratio: f64,
    /// Fraction of the daily quota at which a usage advisory is raised.
    pub usage_warning_ratio: f64,
    /// Flat daily revenue figure fed to the cost monitor, when billing does not push one.
    pub daily_revenue: Option<f64>,
    pub monitor_interval_seconds: u64,
    pub session_idle_timeout_seconds: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            storage_zone: None,
            access_key: None,
            region: StorageRegion::default(),
            public_base_url: "http://localhost:8080/files".to_string(),
            max_retries: 3,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            cdn_base_url: "http://localhost:8080".to_string(),
            token_secret: None,
            default_ttl_seconds: 900,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            scratch_dir: std::env::temp_dir()
                .join("course-delivery")
                .to_string_lossy()
                .to_string(),
            thumbnail_offset: 0.1,
            thumbnail_width: 1280,
            thumbnail_height: 720,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            quotas: QuotaTable::default(),
            emergency_ceilings: EmergencyCeilings::default(),
            cost_per_gb: 0.01,
            cost_warning_ratio: 0.5,
            cost_emergency_ratio: 0.75,
            usage_warning_ratio: 0.8,
            daily_revenue: None,
            monitor_interval_seconds: 300,
            session_idle_timeout_seconds: 4 * 3600,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "edge" | "bunny" => StorageBackend::Edge,
            _ => StorageBackend::Local,
        };

        let region_code = std::env::var("STORAGE_REGION").unwrap_or_default();
        let region = StorageRegion::parse(&region_code).ok_or_else(|| {
            ConfigError::ValidationError(format!("Unknown STORAGE_REGION '{region_code}'"))
        })?;

        let storage_defaults = StorageConfig::default();
        let storage = StorageConfig {
            backend,
            local_storage_path: std::env::var("LOCAL_STORAGE_PATH")
                .unwrap_or(storage_defaults.local_storage_path),
            storage_zone: env_non_empty("STORAGE_ZONE"),
            access_key: env_non_empty("STORAGE_ACCESS_KEY"),
            region,
            public_base_url: std::env::var("STORAGE_PUBLIC_URL")
                .unwrap_or(storage_defaults.public_base_url),
            max_retries: env_parse("STORAGE_MAX_RETRIES").unwrap_or(storage_defaults.max_retries),
        };

        let signing_defaults = SigningConfig::default();
        let signing = SigningConfig {
            cdn_base_url: std::env::var("CDN_BASE_URL").unwrap_or(signing_defaults.cdn_base_url),
            token_secret: env_non_empty("CDN_TOKEN_SECRET"),
            default_ttl_seconds: env_parse("SIGNED_URL_TTL")
                .unwrap_or(signing_defaults.default_ttl_seconds),
        };

        let media_defaults = MediaConfig::default();
        let media = MediaConfig {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(media_defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(media_defaults.ffprobe_path),
            scratch_dir: std::env::var("SCRATCH_DIR").unwrap_or(media_defaults.scratch_dir),
            thumbnail_offset: env_parse("THUMBNAIL_OFFSET")
                .unwrap_or(media_defaults.thumbnail_offset),
            ..media_defaults
        };

        let mut quotas = QuotaTable::default();
        for tier in Tier::ALL {
            let name = tier.as_str().to_uppercase();
            let profile = quotas.profile_mut(tier);
            if let Some(gb) = env_parse(&format!("QUOTA_{name}_DAILY_GB")) {
                profile.daily_bandwidth_gb = gb;
            }
            if let Some(streams) = env_parse(&format!("QUOTA_{name}_MAX_STREAMS")) {
                profile.max_concurrent_streams = streams;
            }
        }

        let delivery_defaults = DeliveryConfig::default();
        let delivery = DeliveryConfig {
            quotas,
            cost_per_gb: env_parse("COST_PER_GB").unwrap_or(delivery_defaults.cost_per_gb),
            cost_warning_ratio: env_parse("COST_WARNING_RATIO")
                .unwrap_or(delivery_defaults.cost_warning_ratio),
            cost_emergency_ratio: env_parse("COST_EMERGENCY_RATIO")
                .unwrap_or(delivery_defaults.cost_emergency_ratio),
            daily_revenue: env_parse("DAILY_REVENUE"),
            monitor_interval_seconds: env_parse("MONITOR_INTERVAL")
                .unwrap_or(delivery_defaults.monitor_interval_seconds),
            ..delivery_defaults
        };

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage,
            signing,
            media,
            upload_limits: UploadLimits::default(),
            delivery,
            entitlement_url: env_non_empty("ENTITLEMENT_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Edge {
            if self.storage.storage_zone.is_none() {
                return Err(ConfigError::ValidationError(
                    "STORAGE_ZONE is required when STORAGE_BACKEND=edge".to_string(),
                ));
            }
            if self.storage.access_key.is_none() {
                return Err(ConfigError::ValidationError(
                    "STORAGE_ACCESS_KEY is required when STORAGE_BACKEND=edge".to_string(),
                ));
            }
        }

        if self.signing.default_ttl_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "SIGNED_URL_TTL must be positive".to_string(),
            ));
        }

        let d = &self.delivery;
        for (name, ratio) in [
            ("COST_WARNING_RATIO", d.cost_warning_ratio),
            ("COST_EMERGENCY_RATIO", d.cost_emergency_ratio),
            ("usage warning ratio", d.usage_warning_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be in (0, 1], got {ratio}"
                )));
            }
        }
        if d.cost_warning_ratio >= d.cost_emergency_ratio {
            return Err(ConfigError::ValidationError(
                "COST_WARNING_RATIO must be below COST_EMERGENCY_RATIO".to_string(),
            ));
        }
        if d.cost_per_gb < 0.0 {
            return Err(ConfigError::ValidationError(
                "COST_PER_GB must not be negative".to_string(),
            ));
        }
        if d.daily_revenue.is_some_and(|r| r < 0.0) {
            return Err(ConfigError::ValidationError(
                "DAILY_REVENUE must not be negative".to_string(),
            ));
        }

        for tier in Tier::ALL {
            let profile = d.quotas.profile(tier);
            if profile.daily_bandwidth_gb <= 0.0 || profile.max_concurrent_streams == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "quota for tier '{}' must allow some bandwidth and at least one stream",
                    tier.as_str()
                )));
            }
            if d.emergency_ceilings.ceiling(tier) > profile.max_quality {
                tracing::debug!(
                    tier = tier.as_str(),
                    "emergency ceiling is above the tier maximum and has no effect"
                );
            }
        }

        if !(0.0..1.0).contains(&self.media.thumbnail_offset) {
            return Err(ConfigError::ValidationError(
                "THUMBNAIL_OFFSET must be in [0, 1)".to_string(),
            ));
        }

        if self.signing.token_secret.is_none() {
            tracing::warn!("CDN_TOKEN_SECRET is not set; signed URL issuance will fail");
        }

        Ok(())
    }
}
