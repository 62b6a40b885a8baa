use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{
    AdminNotifier, Denial, DenyReason, EmergencyCeilings, EmergencyState, QuotaProfile,
    QuotaTable, StreamDecision, Tier, UsageTracker, UsageWarning, BYTES_PER_GB,
};
use crate::config::DeliveryConfig;
use crate::media::Quality;

/// Seconds of watch time before the ladder leaves the warm-up rung.
const WARMUP_SECONDS: u64 = 30;
/// Seconds of watch time before the tier's full quality is unlocked.
const FULL_QUALITY_SECONDS: u64 = 120;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the day's revenue, owned by the billing system.
#[async_trait]
pub trait RevenueSource: Send + Sync {
    async fn daily_revenue(&self, day: NaiveDate) -> anyhow::Result<f64>;
}

/// A constant daily revenue figure.
pub struct FixedRevenue(pub f64);

#[async_trait]
impl RevenueSource for FixedRevenue {
    async fn daily_revenue(&self, _day: NaiveDate) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

/// Used when no revenue feed is configured; every cost check fails.
pub struct NoRevenue;

#[async_trait]
impl RevenueSource for NoRevenue {
    async fn daily_revenue(&self, _day: NaiveDate) -> anyhow::Result<f64> {
        anyhow::bail!("no revenue source is configured")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostStatus {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub status: CostStatus,
    pub date: NaiveDate,
    pub bandwidth_gb: f64,
    pub daily_cost: f64,
    pub daily_revenue: f64,
    pub ratio: f64,
    pub emergency_active: bool,
}

/// Tier policy over shared usage counters and a shared emergency flag.
pub struct AccessPolicyEngine {
    quotas: QuotaTable,
    ceilings: EmergencyCeilings,
    cost_per_gb: f64,
    cost_warning_ratio: f64,
    cost_emergency_ratio: f64,
    usage_warning_ratio: f64,
    emergency: Arc<EmergencyState>,
    usage: Arc<UsageTracker>,
    revenue: Arc<dyn RevenueSource>,
    notifier: Arc<dyn AdminNotifier>,
}

impl AccessPolicyEngine {
    pub fn new(
        config: &DeliveryConfig,
        emergency: Arc<EmergencyState>,
        usage: Arc<UsageTracker>,
        revenue: Arc<dyn RevenueSource>,
        notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self {
            quotas: config.quotas.clone(),
            ceilings: config.emergency_ceilings,
            cost_per_gb: config.cost_per_gb,
            cost_warning_ratio: config.cost_warning_ratio,
            cost_emergency_ratio: config.cost_emergency_ratio,
            usage_warning_ratio: config.usage_warning_ratio,
            emergency,
            usage,
            revenue,
            notifier,
        }
    }

    pub fn profile(&self, tier: Tier) -> &QuotaProfile {
        self.quotas.profile(tier)
    }

    pub fn emergency(&self) -> &Arc<EmergencyState> {
        &self.emergency
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Decide whether a user with the given usage and open streams may start another.
    pub fn can_stream(
        &self,
        user_id: &str,
        tier: Tier,
        daily_usage_bytes: u64,
        active_stream_count: u32,
    ) -> StreamDecision {
        let profile = self.quotas.profile(tier);

        let denial = if daily_usage_bytes >= profile.daily_bandwidth_bytes() {
            Some(
                Denial::new(DenyReason::DailyBandwidthExceeded)
                    .with_retry_after(seconds_until_next_day(Utc::now()))
                    .with_upgrade(tier.upgrade()),
            )
        } else if active_stream_count >= profile.max_concurrent_streams {
            Some(Denial::new(DenyReason::ConcurrencyExceeded).with_upgrade(tier.upgrade()))
        } else if tier == Tier::Free && self.emergency.is_active() {
            Some(Denial::new(DenyReason::EmergencyThrottle).with_upgrade(Some(Tier::Basic)))
        } else {
            None
        };

        match denial {
            Some(denial) => {
                tracing::debug!(user_id, tier = %tier, reason = ?denial.reason, "Stream denied");
                StreamDecision::Denied(denial)
            }
            None => StreamDecision::Allowed,
        }
    }

    /// Check the user's live counters and take a stream slot atomically.
    pub fn admit(self: &Arc<Self>, user_id: &str, tier: Tier) -> Result<StreamSession, Denial> {
        let today = Utc::now().date_naive();
        let active = self.usage.try_acquire(user_id, today, |usage, active| {
            self.can_stream(user_id, tier, usage, active)
        })?;

        tracing::debug!(user_id, tier = %tier, active, "Stream admitted");
        Ok(StreamSession::new(Arc::clone(self), user_id, tier))
    }

    // ========================================================================
    // Quality
    // ========================================================================

    pub fn effective_max_quality(&self, tier: Tier) -> Quality {
        let max = self.quotas.profile(tier).max_quality;
        if self.emergency.is_active() {
            max.min(self.ceilings.ceiling(tier))
        } else {
            max
        }
    }

    /// Resolve an explicitly requested quality against the tier's ceiling.
    pub fn clamp_quality(&self, tier: Tier, requested: Quality) -> Quality {
        requested.min(self.effective_max_quality(tier))
    }

    /// Quality ladder by watch time, capped by the tier's effective ceiling.
    pub fn quality_for_engagement(&self, tier: Tier, watched_seconds: u64) -> Quality {
        let rung = if watched_seconds < WARMUP_SECONDS {
            Quality::Q480
        } else if watched_seconds < FULL_QUALITY_SECONDS {
            match tier {
                Tier::Free => Quality::Q480,
                _ => Quality::Q720,
            }
        } else {
            return self.effective_max_quality(tier);
        };
        rung.min(self.effective_max_quality(tier))
    }

    // ========================================================================
    // Usage
    // ========================================================================

    /// Add transferred bytes to today's record. Returns an advisory the first
    /// time the total crosses the warning fraction of the quota.
    pub fn track_usage(&self, user_id: &str, tier: Tier, bytes_transferred: u64) -> Option<UsageWarning> {
        let today = Utc::now().date_naive();
        let (before, after) = self.usage.add(user_id, today, bytes_transferred);

        let limit = self.quotas.profile(tier).daily_bandwidth_bytes();
        let threshold = (limit as f64 * self.usage_warning_ratio) as u64;
        if before < threshold && after >= threshold {
            let percent_used = if limit == 0 {
                100.0
            } else {
                after as f64 / limit as f64 * 100.0
            };
            tracing::warn!(user_id, tier = %tier, used = after, limit, "User approaching daily bandwidth quota");
            return Some(UsageWarning {
                used_bytes: after,
                limit_bytes: limit,
                percent_used,
            });
        }
        None
    }

    // ========================================================================
    // Cost monitor
    // ========================================================================

    pub fn cost_status(&self, ratio: f64) -> CostStatus {
        if ratio > self.cost_emergency_ratio {
            CostStatus::Critical
        } else if ratio > self.cost_warning_ratio {
            CostStatus::Warning
        } else {
            CostStatus::Ok
        }
    }

    /// Compare today's delivery cost to revenue, entering emergency mode when
    /// the ratio is critical. Entering again while active does nothing.
    pub async fn monitor_daily_costs(&self) -> anyhow::Result<CostReport> {
        let today = Utc::now().date_naive();
        let bandwidth_gb = self.usage.total_for_day(today) as f64 / BYTES_PER_GB;
        let daily_cost = bandwidth_gb * self.cost_per_gb;
        let daily_revenue = self.revenue.daily_revenue(today).await?;

        let ratio = if daily_revenue > 0.0 {
            daily_cost / daily_revenue
        } else if daily_cost > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let status = self.cost_status(ratio);
        let mut report = CostReport {
            status,
            date: today,
            bandwidth_gb,
            daily_cost,
            daily_revenue,
            ratio,
            emergency_active: self.emergency.is_active(),
        };

        match status {
            CostStatus::Critical => {
                if self.enable_emergency_mode() {
                    report.emergency_active = true;
                    self.notify_enabled(&report).await;
                }
            }
            CostStatus::Warning => {
                tracing::warn!(ratio, daily_cost, daily_revenue, "Delivery cost is high relative to revenue");
            }
            CostStatus::Ok => {
                tracing::debug!(ratio, daily_cost, daily_revenue, "Delivery cost within budget");
            }
        }

        Ok(report)
    }

    /// Returns true if this call switched emergency mode on.
    pub fn enable_emergency_mode(&self) -> bool {
        let switched = self.emergency.activate();
        if switched {
            tracing::warn!("Emergency mode enabled, quality ceilings lowered");
        }
        switched
    }

    /// Returns true if this call switched emergency mode off.
    pub fn disable_emergency_mode(&self) -> bool {
        let switched = self.emergency.deactivate();
        if switched {
            tracing::info!("Emergency mode disabled, quality ceilings restored");
        }
        switched
    }

    async fn notify_enabled(&self, report: &CostReport) {
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.emergency_enabled(report)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to notify admins of emergency mode"),
            Err(_) => tracing::error!("Timed out notifying admins of emergency mode"),
        }
    }

    pub async fn notify_disabled(&self) {
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.emergency_disabled()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to notify admins of recovery"),
            Err(_) => tracing::error!("Timed out notifying admins of recovery"),
        }
    }
}

fn seconds_until_next_day(now: DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    let midnight = tomorrow.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    midnight
        .map(|m| (m - now).num_seconds().max(1) as u64)
        .unwrap_or(1)
}

// ============================================================================
// Stream sessions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Admitted,
    Streaming,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_id: String,
    pub outcome: SessionOutcome,
    pub bytes_transferred: u64,
    pub warning: Option<UsageWarning>,
}

/// An admitted stream. Holds one of the user's stream slots until it is
/// completed, aborted, or dropped; usage is committed exactly once.
pub struct StreamSession {
    id: Uuid,
    user_id: String,
    tier: Tier,
    state: SessionState,
    quality: Quality,
    bytes_transferred: u64,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    engine: Arc<AccessPolicyEngine>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("tier", &self.tier)
            .field("state", &self.state)
            .field("quality", &self.quality)
            .field("bytes_transferred", &self.bytes_transferred)
            .finish()
    }
}

impl StreamSession {
    fn new(engine: Arc<AccessPolicyEngine>, user_id: &str, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tier,
            state: SessionState::Admitted,
            quality: Quality::MIN,
            bytes_transferred: 0,
            started_at: now,
            last_activity: now,
            engine,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Move to `Streaming` at the ladder quality for `watched_seconds`.
    pub fn begin(&mut self, watched_seconds: u64) -> Quality {
        self.state = SessionState::Streaming;
        self.quality = self.engine.quality_for_engagement(self.tier, watched_seconds);
        self.last_activity = Utc::now();
        self.quality
    }

    /// Pin the session to a quality below the ladder choice, e.g. a viewer's
    /// manual selection or the best rendition actually stored.
    pub fn cap_quality(&mut self, quality: Quality) -> Quality {
        self.quality = self.quality.min(quality);
        self.quality
    }

    /// Re-evaluate quality. Never steps down unless the effective ceiling did.
    pub fn refresh_quality(&mut self, watched_seconds: u64) -> Quality {
        let rung = self.engine.quality_for_engagement(self.tier, watched_seconds);
        let ceiling = self.engine.effective_max_quality(self.tier);
        self.quality = self.quality.max(rung).min(ceiling);
        self.last_activity = Utc::now();
        self.quality
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
        self.last_activity = Utc::now();
    }

    pub fn complete(mut self) -> SessionSummary {
        self.finish(SessionOutcome::Completed)
    }

    pub fn abort(mut self) -> SessionSummary {
        self.finish(SessionOutcome::Aborted)
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Aborted)
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionSummary {
        self.state = match outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Aborted => SessionState::Aborted,
        };

        let warning = self
            .engine
            .track_usage(&self.user_id, self.tier, self.bytes_transferred);
        self.engine.usage.release(&self.user_id);

        tracing::debug!(
            session_id = %self.id,
            user_id = %self.user_id,
            outcome = ?outcome,
            bytes = self.bytes_transferred,
            "Stream session finished"
        );

        SessionSummary {
            id: self.id,
            user_id: self.user_id.clone(),
            outcome,
            bytes_transferred: self.bytes_transferred,
            warning,
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.finish(SessionOutcome::Aborted);
        }
    }
}
