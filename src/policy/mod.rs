//! Per-tier streaming policy: quotas, usage accounting, quality ladder and
//! the cost-driven emergency throttle.

mod emergency;
mod engine;
mod usage;

pub use emergency::{AdminNotifier, EmergencyCeilings, EmergencyState, LogNotifier};
pub use engine::{
    AccessPolicyEngine, CostReport, CostStatus, FixedRevenue, NoRevenue, RevenueSource, SessionOutcome,
    SessionState, SessionSummary, StreamSession,
};
pub use usage::{DailyUsageRecord, UsageTracker, UsageWarning};

use serde::{Deserialize, Serialize};

use crate::media::Quality;

/// Bytes in one GB for quota purposes.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Subscription tier, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Premium,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Premium];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Pro => "pro",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "basic" => Some(Tier::Basic),
            "pro" => Some(Tier::Pro),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }

    /// The next tier up, if any.
    pub fn upgrade(self) -> Option<Tier> {
        match self {
            Tier::Free => Some(Tier::Basic),
            Tier::Basic => Some(Tier::Pro),
            Tier::Pro => Some(Tier::Premium),
            Tier::Premium => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaProfile {
    pub daily_bandwidth_gb: f64,
    pub max_concurrent_streams: u32,
    pub max_quality: Quality,
    pub download_storage_gb: f64,
}

impl QuotaProfile {
    pub fn daily_bandwidth_bytes(&self) -> u64 {
        (self.daily_bandwidth_gb * BYTES_PER_GB) as u64
    }
}

/// One quota profile per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaTable {
    pub free: QuotaProfile,
    pub basic: QuotaProfile,
    pub pro: QuotaProfile,
    pub premium: QuotaProfile,
}

impl QuotaTable {
    pub fn profile(&self, tier: Tier) -> &QuotaProfile {
        match tier {
            Tier::Free => &self.free,
            Tier::Basic => &self.basic,
            Tier::Pro => &self.pro,
            Tier::Premium => &self.premium,
        }
    }

    pub fn profile_mut(&mut self, tier: Tier) -> &mut QuotaProfile {
        match tier {
            Tier::Free => &mut self.free,
            Tier::Basic => &mut self.basic,
            Tier::Pro => &mut self.pro,
            Tier::Premium => &mut self.premium,
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            free: QuotaProfile {
                daily_bandwidth_gb: 0.5,
                max_concurrent_streams: 1,
                max_quality: Quality::Q480,
                download_storage_gb: 0.0,
            },
            basic: QuotaProfile {
                daily_bandwidth_gb: 5.0,
                max_concurrent_streams: 2,
                max_quality: Quality::Q720,
                download_storage_gb: 2.0,
            },
            pro: QuotaProfile {
                daily_bandwidth_gb: 20.0,
                max_concurrent_streams: 3,
                max_quality: Quality::Q1080,
                download_storage_gb: 10.0,
            },
            premium: QuotaProfile {
                daily_bandwidth_gb: 100.0,
                max_concurrent_streams: 5,
                max_quality: Quality::Q4k,
                download_storage_gb: 50.0,
            },
        }
    }
}

/// Machine-readable reason a stream was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    DailyBandwidthExceeded,
    ConcurrencyExceeded,
    EmergencyThrottle,
}

impl DenyReason {
    pub fn message(self) -> &'static str {
        match self {
            DenyReason::DailyBandwidthExceeded => "Daily bandwidth limit reached",
            DenyReason::ConcurrencyExceeded => "Maximum concurrent streams reached",
            DenyReason::EmergencyThrottle => {
                "Streaming is temporarily unavailable on the free tier"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenyReason,
    pub message: String,
    /// Seconds until retrying could succeed, when that is knowable.
    pub retry_after: Option<u64>,
    /// Tier that would lift this limit.
    pub upgrade_to: Option<Tier>,
}

impl Denial {
    pub fn new(reason: DenyReason) -> Self {
        Self {
            reason,
            message: reason.message().to_string(),
            retry_after: None,
            upgrade_to: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_upgrade(mut self, tier: Option<Tier>) -> Self {
        self.upgrade_to = tier;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamDecision {
    Allowed,
    Denied(Denial),
}

impl StreamDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, StreamDecision::Allowed)
    }
}
