//! Streaming URL issuance: entitlement, admission, quality and signing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::media::Quality;
use crate::policy::{AccessPolicyEngine, Denial, SessionSummary, StreamSession, Tier};
use crate::signing::{SigningError, UrlSigner};
use crate::storage::models::StoredAsset;
use crate::storage::{Database, DatabaseError};

/// The authenticated caller, as resolved by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub role: String,
    pub tier: Tier,
}

/// Answers whether a viewer may watch an asset.
#[async_trait]
pub trait Entitlements: Send + Sync {
    async fn is_entitled(&self, viewer: &Viewer, asset_id: &str) -> anyhow::Result<bool>;
}

/// For deployments where the gateway has already checked entitlement.
pub struct GatewayEntitlements;

#[async_trait]
impl Entitlements for GatewayEntitlements {
    async fn is_entitled(&self, _viewer: &Viewer, _asset_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Asks an entitlement endpoint: `GET {base}/users/{user}/assets/{asset}`,
/// where 200 means entitled and 403/404 means not.
pub struct RemoteEntitlements {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteEntitlements {
    pub fn new(base_url: &str) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Entitlements for RemoteEntitlements {
    async fn is_entitled(&self, viewer: &Viewer, asset_id: &str) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(format!(
                "{}/users/{}/assets/{}",
                self.base_url, viewer.user_id, asset_id
            ))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(anyhow::anyhow!("entitlement service returned {s}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),
    #[error("Viewer is not entitled to this asset")]
    NotEntitled,
    #[error("Entitlement check failed: {0}")]
    Entitlement(anyhow::Error),
    #[error("{}", .0.message)]
    Denied(Denial),
    #[error("No playable rendition at or below {0}")]
    NoRendition(Quality),
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] DatabaseError),
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamGrant {
    pub session_id: Uuid,
    pub asset_id: String,
    pub url: String,
    pub quality: Quality,
    pub expires: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamProgress {
    pub session_id: Uuid,
    pub quality: Quality,
    pub bytes_transferred: u64,
    /// Set when the rendition changed; the player should switch to this URL.
    pub renewed: Option<StreamGrant>,
}

/// A live session and what is needed to re-sign its URL.
struct ActiveStream {
    session: StreamSession,
    asset: StoredAsset,
    /// The viewer's manual selection, if any.
    requested: Option<Quality>,
}

/// Issues signed playback URLs and tracks the sessions behind them.
pub struct DeliveryService {
    engine: Arc<AccessPolicyEngine>,
    signer: UrlSigner,
    cdn_base_url: String,
    catalog: Database,
    entitlements: Arc<dyn Entitlements>,
    sessions: DashMap<Uuid, ActiveStream>,
}

impl DeliveryService {
    pub fn new(
        engine: Arc<AccessPolicyEngine>,
        signer: UrlSigner,
        cdn_base_url: &str,
        catalog: Database,
        entitlements: Arc<dyn Entitlements>,
    ) -> Self {
        Self {
            engine,
            signer,
            cdn_base_url: cdn_base_url.trim_end_matches('/').to_string(),
            catalog,
            entitlements,
            sessions: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<AccessPolicyEngine> {
        &self.engine
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Admit a viewer to an asset and hand back a signed URL for the chosen rendition.
    pub async fn start_stream(
        &self,
        viewer: &Viewer,
        asset_id: &str,
        watched_seconds: u64,
        requested: Option<Quality>,
    ) -> Result<StreamGrant, DeliveryError> {
        let asset = self
            .catalog
            .get_asset(asset_id)?
            .ok_or_else(|| DeliveryError::AssetNotFound(asset_id.to_string()))?;

        let entitled = self
            .entitlements
            .is_entitled(viewer, asset_id)
            .await
            .map_err(DeliveryError::Entitlement)?;
        if !entitled {
            return Err(DeliveryError::NotEntitled);
        }

        // Fail on configuration before taking a slot.
        if !self.signer.is_configured() {
            return Err(DeliveryError::Signing(SigningError::MissingSecret));
        }

        let mut session = self
            .engine
            .admit(&viewer.user_id, viewer.tier)
            .map_err(DeliveryError::Denied)?;

        let mut ceiling = session.begin(watched_seconds);
        if let Some(requested) = requested {
            ceiling = session.cap_quality(self.engine.clamp_quality(viewer.tier, requested));
        }

        // Dropping the session on these error paths releases the slot.
        let (quality, key) = asset
            .variant_for(ceiling)
            .map(|(q, k)| (q, k.to_string()))
            .ok_or(DeliveryError::NoRendition(ceiling))?;
        session.cap_quality(quality);

        let grant = self.grant(session.id(), asset_id, quality, &key)?;

        tracing::info!(
            user_id = %viewer.user_id,
            tier = %viewer.tier,
            asset_id,
            quality = %quality,
            session_id = %grant.session_id,
            "Issued stream"
        );
        self.sessions.insert(
            session.id(),
            ActiveStream {
                session,
                asset,
                requested,
            },
        );
        Ok(grant)
    }

    fn grant(
        &self,
        session_id: Uuid,
        asset_id: &str,
        quality: Quality,
        key: &str,
    ) -> Result<StreamGrant, DeliveryError> {
        let signed = self
            .signer
            .sign(&self.cdn_base_url, key, self.signer.default_ttl())?;
        Ok(StreamGrant {
            session_id,
            asset_id: asset_id.to_string(),
            url: signed.url,
            quality,
            expires: signed.expires,
        })
    }

    /// Record transferred bytes for one of `user_id`'s live sessions. With
    /// `watched_seconds`, the quality ladder is re-evaluated and a freshly
    /// signed URL is returned if the rendition changes.
    pub fn report_progress(
        &self,
        session_id: Uuid,
        user_id: &str,
        bytes: u64,
        watched_seconds: Option<u64>,
    ) -> Result<StreamProgress, DeliveryError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .filter(|stream| stream.session.user_id() == user_id)
            .ok_or(DeliveryError::SessionNotFound(session_id))?;
        let stream = entry.value_mut();

        stream.session.record_bytes(bytes);
        let renewed = match watched_seconds {
            Some(watched) => self.requalify(session_id, stream, watched)?,
            None => None,
        };

        Ok(StreamProgress {
            session_id,
            quality: stream.session.quality(),
            bytes_transferred: stream.session.bytes_transferred(),
            renewed,
        })
    }

    fn requalify(
        &self,
        session_id: Uuid,
        stream: &mut ActiveStream,
        watched_seconds: u64,
    ) -> Result<Option<StreamGrant>, DeliveryError> {
        let before = stream.session.quality();
        let mut target = stream.session.refresh_quality(watched_seconds);
        if let Some(requested) = stream.requested {
            let tier = stream.session.tier();
            target = stream
                .session
                .cap_quality(self.engine.clamp_quality(tier, requested));
        }

        let (quality, key) = stream
            .asset
            .variant_for(target)
            .map(|(q, k)| (q, k.to_string()))
            .ok_or(DeliveryError::NoRendition(target))?;
        stream.session.cap_quality(quality);
        if quality == before {
            return Ok(None);
        }

        let grant = self.grant(session_id, &stream.asset.id, quality, &key)?;
        tracing::info!(
            session_id = %session_id,
            from = %before,
            to = %quality,
            "Stream quality changed"
        );
        Ok(Some(grant))
    }

    /// Close a session, committing its usage and releasing its slot.
    pub fn finish_stream(
        &self,
        session_id: Uuid,
        user_id: &str,
        bytes: u64,
        completed: bool,
    ) -> Result<SessionSummary, DeliveryError> {
        let (_, stream) = self
            .sessions
            .remove_if(&session_id, |_, s| s.session.user_id() == user_id)
            .ok_or(DeliveryError::SessionNotFound(session_id))?;

        let mut session = stream.session;
        session.record_bytes(bytes);
        Ok(if completed {
            session.complete()
        } else {
            session.abort()
        })
    }

    /// Abort sessions with no activity for `idle_timeout`, e.g. after a client vanished.
    pub fn reap_idle_sessions(&self, idle_timeout: Duration) -> Vec<SessionSummary> {
        let cutoff = Utc::now() - idle_timeout;
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().session.last_activity() <= cutoff)
            .map(|entry| *entry.key())
            .collect();

        let reaped = self.reap(stale, cutoff);
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "Reaped idle stream sessions");
        }
        reaped
    }

    /// Abort each candidate that is still idle at removal time. A session
    /// that reported progress since it was picked stays live.
    fn reap(&self, candidates: Vec<Uuid>, cutoff: DateTime<Utc>) -> Vec<SessionSummary> {
        candidates
            .into_iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(&id, |_, s| s.session.last_activity() <= cutoff)
            })
            .map(|(_, stream)| stream.session.abort())
            .collect()
    }
}
