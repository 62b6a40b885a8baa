use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CostReport, Tier};
use crate::media::Quality;

/// Quality ceilings applied while emergency mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyCeilings {
    pub free: Quality,
    pub basic: Quality,
    pub pro: Quality,
    pub premium: Quality,
}

impl EmergencyCeilings {
    pub fn ceiling(&self, tier: Tier) -> Quality {
        match tier {
            Tier::Free => self.free,
            Tier::Basic => self.basic,
            Tier::Pro => self.pro,
            Tier::Premium => self.premium,
        }
    }
}

impl Default for EmergencyCeilings {
    fn default() -> Self {
        Self {
            free: Quality::Q480,
            basic: Quality::Q480,
            pro: Quality::Q720,
            premium: Quality::Q1080,
        }
    }
}

/// Process-wide throttle flag, shared by handle between the cost monitor and
/// every request path.
#[derive(Debug, Default)]
pub struct EmergencyState {
    active: AtomicBool,
    /// Epoch seconds of the last activation, 0 when inactive.
    activated_at: AtomicI64,
}

impl EmergencyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        match self.activated_at.load(Ordering::Acquire) {
            0 => None,
            ts => DateTime::from_timestamp(ts, 0),
        }
    }

    /// Returns true only for the call that flipped the flag on.
    pub fn activate(&self) -> bool {
        let flipped = self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.activated_at
                .store(Utc::now().timestamp(), Ordering::Release);
        }
        flipped
    }

    /// Returns true only for the call that flipped the flag off.
    pub fn deactivate(&self) -> bool {
        let flipped = self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.activated_at.store(0, Ordering::Release);
        }
        flipped
    }
}

/// Receives emergency transitions. Delivery is best-effort.
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn emergency_enabled(&self, report: &CostReport) -> anyhow::Result<()>;
    async fn emergency_disabled(&self) -> anyhow::Result<()>;
}

/// Writes transitions to the log.
pub struct LogNotifier;

#[async_trait]
impl AdminNotifier for LogNotifier {
    async fn emergency_enabled(&self, report: &CostReport) -> anyhow::Result<()> {
        tracing::error!(
            daily_cost = report.daily_cost,
            daily_revenue = report.daily_revenue,
            ratio = report.ratio,
            "Emergency mode enabled: delivery cost is over budget"
        );
        Ok(())
    }

    async fn emergency_disabled(&self) -> anyhow::Result<()> {
        tracing::warn!("Emergency mode disabled");
        Ok(())
    }
}
