use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use course_delivery::config::DeliveryConfig;
use course_delivery::media::Quality;
use course_delivery::policy::{
    AccessPolicyEngine, AdminNotifier, CostReport, CostStatus, DenyReason, EmergencyState,
    FixedRevenue, NoRevenue, RevenueSource, SessionOutcome, SessionState, StreamDecision, Tier,
    UsageTracker, BYTES_PER_GB,
};

const GB: u64 = BYTES_PER_GB as u64;

#[derive(Default)]
struct RecordingNotifier {
    enabled: AtomicUsize,
    disabled: AtomicUsize,
}

#[async_trait]
impl AdminNotifier for RecordingNotifier {
    async fn emergency_enabled(&self, _report: &CostReport) -> anyhow::Result<()> {
        self.enabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn emergency_disabled(&self) -> anyhow::Result<()> {
        self.disabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl AdminNotifier for FailingNotifier {
    async fn emergency_enabled(&self, _report: &CostReport) -> anyhow::Result<()> {
        anyhow::bail!("mail relay down")
    }

    async fn emergency_disabled(&self) -> anyhow::Result<()> {
        anyhow::bail!("mail relay down")
    }
}

fn engine_with(
    config: &DeliveryConfig,
    revenue: Arc<dyn RevenueSource>,
    notifier: Arc<dyn AdminNotifier>,
) -> Arc<AccessPolicyEngine> {
    Arc::new(AccessPolicyEngine::new(
        config,
        Arc::new(EmergencyState::new()),
        Arc::new(UsageTracker::new()),
        revenue,
        notifier,
    ))
}

fn test_engine() -> Arc<AccessPolicyEngine> {
    engine_with(
        &DeliveryConfig::default(),
        Arc::new(FixedRevenue(100.0)),
        Arc::new(RecordingNotifier::default()),
    )
}

fn denied_reason(decision: StreamDecision) -> DenyReason {
    match decision {
        StreamDecision::Denied(denial) => denial.reason,
        StreamDecision::Allowed => panic!("expected a denial"),
    }
}

// ============================================================================
// canStream
// ============================================================================

#[test]
fn test_bandwidth_boundary() {
    let engine = test_engine();
    let limit = engine.profile(Tier::Free).daily_bandwidth_bytes();
    assert_eq!(limit, GB / 2);

    assert!(engine.can_stream("u1", Tier::Free, limit - 1, 0).is_allowed());

    let decision = engine.can_stream("u1", Tier::Free, limit, 0);
    match decision {
        StreamDecision::Denied(denial) => {
            assert_eq!(denial.reason, DenyReason::DailyBandwidthExceeded);
            assert_eq!(denial.message, "Daily bandwidth limit reached");
            assert_eq!(denial.upgrade_to, Some(Tier::Basic));
            let retry = denial.retry_after.expect("bandwidth denials carry retry_after");
            assert!((1..=86_400).contains(&retry));
        }
        StreamDecision::Allowed => panic!("usage at the limit must be denied"),
    }
}

#[test]
fn test_concurrency_boundary() {
    let engine = test_engine();
    let max = engine.profile(Tier::Pro).max_concurrent_streams;
    assert_eq!(max, 3);

    assert!(engine.can_stream("u1", Tier::Pro, 0, max - 1).is_allowed());
    assert_eq!(
        denied_reason(engine.can_stream("u1", Tier::Pro, 0, max)),
        DenyReason::ConcurrencyExceeded
    );
}

#[test]
fn test_bandwidth_checked_before_concurrency() {
    let engine = test_engine();
    let limit = engine.profile(Tier::Basic).daily_bandwidth_bytes();
    assert_eq!(
        denied_reason(engine.can_stream("u1", Tier::Basic, limit, 99)),
        DenyReason::DailyBandwidthExceeded
    );
}

#[test]
fn test_premium_has_no_upgrade_hint() {
    let engine = test_engine();
    let limit = engine.profile(Tier::Premium).daily_bandwidth_bytes();
    match engine.can_stream("u1", Tier::Premium, limit, 0) {
        StreamDecision::Denied(denial) => assert_eq!(denial.upgrade_to, None),
        StreamDecision::Allowed => panic!("expected a denial"),
    }
}

#[test]
fn test_free_cumulative_usage_exceeding_quota_is_denied() {
    let engine = test_engine();

    // Two sessions of 300 MB push a free user past 0.5 GB
    for _ in 0..2 {
        let mut session = engine.admit("student", Tier::Free).unwrap();
        session.begin(0);
        session.record_bytes(300 * 1024 * 1024);
        session.complete();
    }

    let denial = engine.admit("student", Tier::Free).unwrap_err();
    assert_eq!(denial.reason, DenyReason::DailyBandwidthExceeded);
    assert_eq!(denial.message, "Daily bandwidth limit reached");
}

#[test]
fn test_emergency_denies_free_tier_only() {
    let engine = test_engine();
    assert!(engine.enable_emergency_mode());

    assert_eq!(
        denied_reason(engine.can_stream("u1", Tier::Free, 0, 0)),
        DenyReason::EmergencyThrottle
    );
    assert!(engine.can_stream("u2", Tier::Basic, 0, 0).is_allowed());
    assert!(engine.can_stream("u3", Tier::Premium, 0, 0).is_allowed());
}

// ============================================================================
// Quality
// ============================================================================

#[test]
fn test_engagement_ladder() {
    let engine = test_engine();

    for tier in Tier::ALL {
        assert_eq!(engine.quality_for_engagement(tier, 0), Quality::Q480);
        assert_eq!(engine.quality_for_engagement(tier, 29), Quality::Q480);
    }

    assert_eq!(engine.quality_for_engagement(Tier::Free, 30), Quality::Q480);
    assert_eq!(engine.quality_for_engagement(Tier::Basic, 30), Quality::Q720);
    assert_eq!(engine.quality_for_engagement(Tier::Premium, 119), Quality::Q720);

    assert_eq!(engine.quality_for_engagement(Tier::Free, 120), Quality::Q480);
    assert_eq!(engine.quality_for_engagement(Tier::Basic, 120), Quality::Q720);
    assert_eq!(engine.quality_for_engagement(Tier::Pro, 120), Quality::Q1080);
    assert_eq!(engine.quality_for_engagement(Tier::Premium, 3600), Quality::Q4k);
}

#[test]
fn test_emergency_ceilings_clamp_quality() {
    let engine = test_engine();
    assert_eq!(engine.effective_max_quality(Tier::Premium), Quality::Q4k);
    assert_eq!(engine.clamp_quality(Tier::Pro, Quality::Q4k), Quality::Q1080);

    engine.enable_emergency_mode();
    assert_eq!(engine.effective_max_quality(Tier::Basic), Quality::Q480);
    assert_eq!(engine.effective_max_quality(Tier::Pro), Quality::Q720);
    assert_eq!(engine.effective_max_quality(Tier::Premium), Quality::Q1080);
    assert_eq!(engine.clamp_quality(Tier::Premium, Quality::Q4k), Quality::Q1080);
    // The intermediate rung is clamped as well
    assert_eq!(engine.quality_for_engagement(Tier::Basic, 60), Quality::Q480);

    engine.disable_emergency_mode();
    assert_eq!(engine.effective_max_quality(Tier::Premium), Quality::Q4k);
}

#[test]
fn test_session_quality_never_regresses_without_ceiling_change() {
    let engine = test_engine();
    let mut session = engine.admit("viewer", Tier::Premium).unwrap();

    assert_eq!(session.begin(10), Quality::Q480);
    assert_eq!(session.refresh_quality(60), Quality::Q720);
    assert_eq!(session.refresh_quality(200), Quality::Q4k);
    // Reporting a smaller watch time does not step down
    assert_eq!(session.refresh_quality(5), Quality::Q4k);

    engine.enable_emergency_mode();
    assert_eq!(session.refresh_quality(300), Quality::Q1080);
}

// ============================================================================
// Usage tracking and sessions
// ============================================================================

#[test]
fn test_usage_warning_raised_once_when_crossing_threshold() {
    let engine = test_engine();
    let limit = engine.profile(Tier::Basic).daily_bandwidth_bytes();
    let threshold = (limit as f64 * 0.8) as u64;

    assert!(engine.track_usage("u1", Tier::Basic, threshold - 1).is_none());

    let warning = engine
        .track_usage("u1", Tier::Basic, 1)
        .expect("crossing 80% raises the advisory");
    assert_eq!(warning.used_bytes, threshold);
    assert_eq!(warning.limit_bytes, limit);
    assert!((warning.percent_used - 80.0).abs() < 0.01);

    assert!(engine.track_usage("u1", Tier::Basic, GB / 10).is_none());
    assert_eq!(
        engine.usage().usage("u1", Utc::now().date_naive()),
        threshold + GB / 10
    );
}

#[test]
fn test_usage_partitioned_by_user() {
    let engine = test_engine();
    engine.track_usage("alice", Tier::Pro, 1000);
    engine.track_usage("bob", Tier::Pro, 500);

    let today = Utc::now().date_naive();
    assert_eq!(engine.usage().usage("alice", today), 1000);
    assert_eq!(engine.usage().usage("bob", today), 500);
    assert_eq!(engine.usage().total_for_day(today), 1500);

    let record = engine.usage().record("alice", today);
    assert_eq!(record.bytes_transferred, 1000);
    assert_eq!(record.date_key, today);
}

#[test]
fn test_session_commits_usage_once_and_releases_slot() {
    let engine = test_engine();
    let today = Utc::now().date_naive();

    let mut session = engine.admit("viewer", Tier::Basic).unwrap();
    assert_eq!(session.state(), SessionState::Admitted);
    assert_eq!(engine.usage().active_streams("viewer"), 1);

    session.begin(0);
    assert_eq!(session.state(), SessionState::Streaming);
    session.record_bytes(4096);
    session.record_bytes(4096);

    let summary = session.complete();
    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.bytes_transferred, 8192);
    assert_eq!(engine.usage().usage("viewer", today), 8192);
    assert_eq!(engine.usage().active_streams("viewer"), 0);
}

#[test]
fn test_dropped_session_aborts_and_commits() {
    let engine = test_engine();
    {
        let mut session = engine.admit("viewer", Tier::Basic).unwrap();
        session.begin(0);
        session.record_bytes(1000);
        assert_eq!(engine.usage().active_streams("viewer"), 1);
    }

    assert_eq!(engine.usage().active_streams("viewer"), 0);
    assert_eq!(engine.usage().usage("viewer", Utc::now().date_naive()), 1000);
}

#[test]
fn test_admit_enforces_concurrency() {
    let engine = test_engine();

    let first = engine.admit("viewer", Tier::Basic).unwrap();
    let _second = engine.admit("viewer", Tier::Basic).unwrap();
    let denial = engine.admit("viewer", Tier::Basic).unwrap_err();
    assert_eq!(denial.reason, DenyReason::ConcurrencyExceeded);

    first.abort();
    assert!(engine.admit("viewer", Tier::Basic).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admits_never_exceed_limit() {
    let engine = test_engine();
    let max = engine.profile(Tier::Pro).max_concurrent_streams as usize;

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.admit("shared-account", Tier::Pro).ok() })
        })
        .collect();

    let mut sessions = Vec::new();
    for handle in handles {
        if let Some(session) = handle.await.unwrap() {
            sessions.push(session);
        }
    }

    assert_eq!(sessions.len(), max);
    assert_eq!(engine.usage().active_streams("shared-account") as usize, max);

    drop(sessions);
    assert_eq!(engine.usage().active_streams("shared-account"), 0);
}

#[test]
fn test_prune_old_usage() {
    let tracker = UsageTracker::new();
    let today = Utc::now().date_naive();
    let last_week = today - chrono::Duration::days(7);

    tracker.add("u1", last_week, 10);
    tracker.add("u1", today, 20);

    assert_eq!(tracker.prune_before(today), 1);
    assert_eq!(tracker.usage("u1", last_week), 0);
    assert_eq!(tracker.usage("u1", today), 20);
}

// ============================================================================
// Cost monitor and emergency mode
// ============================================================================

#[test]
fn test_cost_status_thresholds() {
    let engine = test_engine();
    assert_eq!(engine.cost_status(0.3), CostStatus::Ok);
    assert_eq!(engine.cost_status(0.5), CostStatus::Ok);
    assert_eq!(engine.cost_status(0.6), CostStatus::Warning);
    assert_eq!(engine.cost_status(0.75), CostStatus::Warning);
    assert_eq!(engine.cost_status(0.76), CostStatus::Critical);
    assert_eq!(engine.cost_status(f64::INFINITY), CostStatus::Critical);
}

#[tokio::test]
async fn test_critical_cost_enables_emergency_and_clamps_premium() {
    let config = DeliveryConfig {
        cost_per_gb: 1.0,
        ..DeliveryConfig::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine_with(&config, Arc::new(FixedRevenue(100.0)), notifier.clone());

    // 76 GB at 1.0/GB against 100 revenue
    engine.usage().add("heavy", Utc::now().date_naive(), 76 * GB);

    let report = engine.monitor_daily_costs().await.unwrap();
    assert_eq!(report.status, CostStatus::Critical);
    assert!((report.ratio - 0.76).abs() < 1e-9);
    assert!(report.emergency_active);
    assert!(engine.emergency().is_active());
    assert!(engine.emergency().activated_at().is_some());
    assert_eq!(engine.clamp_quality(Tier::Premium, Quality::Q4k), Quality::Q1080);

    // Running again while active does not re-notify
    engine.monitor_daily_costs().await.unwrap();
    assert_eq!(notifier.enabled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_warning_cost_does_not_enable_emergency() {
    let config = DeliveryConfig {
        cost_per_gb: 1.0,
        ..DeliveryConfig::default()
    };
    let engine = engine_with(
        &config,
        Arc::new(FixedRevenue(100.0)),
        Arc::new(RecordingNotifier::default()),
    );
    engine.usage().add("heavy", Utc::now().date_naive(), 60 * GB);

    let report = engine.monitor_daily_costs().await.unwrap();
    assert_eq!(report.status, CostStatus::Warning);
    assert!(!report.emergency_active);
    assert!(!engine.emergency().is_active());
}

#[tokio::test]
async fn test_zero_revenue_with_cost_is_critical() {
    let engine = engine_with(
        &DeliveryConfig::default(),
        Arc::new(FixedRevenue(0.0)),
        Arc::new(RecordingNotifier::default()),
    );
    engine.usage().add("u1", Utc::now().date_naive(), GB);

    let report = engine.monitor_daily_costs().await.unwrap();
    assert_eq!(report.status, CostStatus::Critical);
    assert!(report.ratio.is_infinite());
}

#[tokio::test]
async fn test_notifier_failure_does_not_block_emergency() {
    let config = DeliveryConfig {
        cost_per_gb: 1.0,
        ..DeliveryConfig::default()
    };
    let engine = engine_with(&config, Arc::new(FixedRevenue(1.0)), Arc::new(FailingNotifier));
    engine.usage().add("u1", Utc::now().date_naive(), GB);

    let report = engine.monitor_daily_costs().await.unwrap();
    assert_eq!(report.status, CostStatus::Critical);
    assert!(engine.emergency().is_active());
}

#[tokio::test]
async fn test_missing_revenue_source_fails_monitor() {
    let engine = engine_with(
        &DeliveryConfig::default(),
        Arc::new(NoRevenue),
        Arc::new(RecordingNotifier::default()),
    );
    assert!(engine.monitor_daily_costs().await.is_err());
    assert!(!engine.emergency().is_active());
}

#[tokio::test]
async fn test_emergency_toggle_is_idempotent() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine_with(
        &DeliveryConfig::default(),
        Arc::new(FixedRevenue(100.0)),
        notifier.clone(),
    );

    assert!(engine.enable_emergency_mode());
    assert!(!engine.enable_emergency_mode());
    assert!(engine.emergency().is_active());

    assert!(engine.disable_emergency_mode());
    assert!(!engine.disable_emergency_mode());
    assert!(!engine.emergency().is_active());
    assert!(engine.emergency().activated_at().is_none());

    engine.notify_disabled().await;
    assert_eq!(notifier.disabled.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_emergency_state_is_observed() {
    let state = Arc::new(EmergencyState::new());
    let engine = Arc::new(AccessPolicyEngine::new(
        &DeliveryConfig::default(),
        Arc::clone(&state),
        Arc::new(UsageTracker::new()),
        Arc::new(FixedRevenue(1.0)),
        Arc::new(RecordingNotifier::default()),
    ));

    state.activate();
    assert_eq!(
        denied_reason(engine.can_stream("u1", Tier::Free, 0, 0)),
        DenyReason::EmergencyThrottle
    );
}
