//! Tier-based admission control.
//!
//! Two fixed-window counters per requester, one per minute and one per UTC
//! day, both kept in the cache layer. Admission increments first and rolls
//! back on denial, so concurrent admits can briefly overcount but never let
//! more runs through than the ceiling allows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use paperbrief_shared::{AppConfig, Result, Tier};
use paperbrief_storage::{CacheStore, keys};
use tracing::{debug, info, instrument};

/// Per-minute and per-day ceilings for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    pub default: TierLimits,
    pub trusted: TierLimits,
}

impl From<&AppConfig> for RateLimits {
    fn from(config: &AppConfig) -> Self {
        let r = &config.rate_limits;
        Self {
            default: TierLimits {
                per_minute: r.default_per_minute,
                per_day: r.default_per_day,
            },
            trusted: TierLimits {
                per_minute: r.trusted_per_minute,
                per_day: r.trusted_per_day,
            },
        }
    }
}

impl RateLimits {
    /// Ceilings for `tier`; `None` means unlimited.
    pub fn for_tier(&self, tier: Tier) -> Option<TierLimits> {
        match tier {
            Tier::Default => Some(self.default),
            Tier::Trusted => Some(self.trusted),
            Tier::Admin => None,
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Try again after `retry_after`, always at least one second.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub struct RateLimiter {
    limits: RateLimits,
    cache: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, cache: Arc<dyn CacheStore>) -> Self {
        Self { limits, cache }
    }

    pub async fn admit(&self, requester_id: &str, tier: Tier) -> Result<Admission> {
        self.admit_at(requester_id, tier, Utc::now()).await
    }

    /// Admission check against an explicit clock reading.
    #[instrument(skip_all, fields(requester = %requester_id, tier = %tier))]
    pub async fn admit_at(
        &self,
        requester_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let minute_key = keys::rate_minute(requester_id, now.timestamp().div_euclid(60));
        let day_key = keys::rate_day(requester_id, now.date_naive());
        let limits = self.limits.for_tier(tier);

        let minute_count = self.bump(&minute_key, 1.0, keys::ttl::RATE_MINUTE).await?;
        if let Some(l) = limits.filter(|l| minute_count > f64::from(l.per_minute)) {
            self.bump(&minute_key, -1.0, keys::ttl::RATE_MINUTE).await?;
            let retry_after = secs_to_next_minute(now);
            info!(limit = l.per_minute, retry_after_secs = retry_after.as_secs(), "minute ceiling reached");
            return Ok(Admission::Denied { retry_after });
        }

        let day_count = self.bump(&day_key, 1.0, keys::ttl::RATE_DAY).await?;
        if let Some(l) = limits.filter(|l| day_count > f64::from(l.per_day)) {
            self.bump(&day_key, -1.0, keys::ttl::RATE_DAY).await?;
            self.bump(&minute_key, -1.0, keys::ttl::RATE_MINUTE).await?;
            let retry_after = secs_to_next_day(now);
            info!(limit = l.per_day, retry_after_secs = retry_after.as_secs(), "daily ceiling reached");
            return Ok(Admission::Denied { retry_after });
        }

        debug!(minute_count, day_count, "admitted");
        Ok(Admission::Allowed)
    }

    async fn bump(&self, key: &str, amount: f64, ttl: Duration) -> Result<f64> {
        self.cache.incr_by(key, keys::COUNT_FIELD, amount, ttl).await
    }
}

fn secs_to_next_minute(now: DateTime<Utc>) -> Duration {
    let elapsed = now.timestamp().rem_euclid(60) as u64;
    Duration::from_secs((60 - elapsed).max(1))
}

fn secs_to_next_day(now: DateTime<Utc>) -> Duration {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    let secs = tomorrow.map_or(1, |t| (t - now).num_seconds());
    Duration::from_secs(secs.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use paperbrief_storage::MemoryCache;

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            RateLimits::from(&AppConfig::default()),
            Arc::new(MemoryCache::new()),
        )
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn default_tier_minute_ceiling() {
        let rl = limiter();
        for _ in 0..3 {
            assert!(rl.admit_at("u1", Tier::Default, at(10, 0, 5)).await.unwrap().is_allowed());
        }
        let denied = rl.admit_at("u1", Tier::Default, at(10, 0, 15)).await.unwrap();
        assert_eq!(denied, Admission::Denied { retry_after: Duration::from_secs(45) });

        // Other requesters have their own windows.
        assert!(rl.admit_at("u2", Tier::Default, at(10, 0, 15)).await.unwrap().is_allowed());
        // A new minute frees the window.
        assert!(rl.admit_at("u1", Tier::Default, at(10, 1, 0)).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn denial_does_not_consume_quota() {
        let rl = limiter();
        for _ in 0..3 {
            rl.admit_at("u1", Tier::Default, at(10, 0, 0)).await.unwrap();
        }
        for _ in 0..5 {
            assert!(!rl.admit_at("u1", Tier::Default, at(10, 0, 1)).await.unwrap().is_allowed());
        }
        let fields = rl
            .cache
            .get_fields(&keys::rate_minute("u1", at(10, 0, 0).timestamp() / 60))
            .await
            .unwrap();
        assert_eq!(fields.get(keys::COUNT_FIELD), Some(&3.0));

        let fields = rl
            .cache
            .get_fields(&keys::rate_day("u1", at(10, 0, 0).date_naive()))
            .await
            .unwrap();
        assert_eq!(fields.get(keys::COUNT_FIELD), Some(&3.0));
    }

    #[tokio::test]
    async fn daily_ceiling_reports_time_to_midnight() {
        let rl = limiter();
        // 20 admits spread over 7 minutes stay under the minute ceiling.
        for i in 0..20u32 {
            let now = at(12, i / 3, 0);
            assert!(rl.admit_at("u1", Tier::Default, now).await.unwrap().is_allowed(), "admit {i}");
        }
        let denied = rl.admit_at("u1", Tier::Default, at(23, 59, 30)).await.unwrap();
        assert_eq!(denied, Admission::Denied { retry_after: Duration::from_secs(30) });

        // The minute counter was rolled back along with the day counter.
        let fields = rl
            .cache
            .get_fields(&keys::rate_minute("u1", at(23, 59, 30).timestamp() / 60))
            .await
            .unwrap();
        assert_eq!(fields.get(keys::COUNT_FIELD).copied().unwrap_or(0.0), 0.0);
    }

    #[tokio::test]
    async fn trusted_tier_has_higher_ceiling() {
        let rl = limiter();
        for _ in 0..6 {
            assert!(rl.admit_at("t", Tier::Trusted, at(9, 0, 0)).await.unwrap().is_allowed());
        }
        assert!(!rl.admit_at("t", Tier::Trusted, at(9, 0, 0)).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn admin_is_counted_but_never_denied() {
        let rl = limiter();
        for _ in 0..50 {
            assert!(rl.admit_at("root", Tier::Admin, at(9, 0, 0)).await.unwrap().is_allowed());
        }
        let fields = rl
            .cache
            .get_fields(&keys::rate_day("root", at(9, 0, 0).date_naive()))
            .await
            .unwrap();
        assert_eq!(fields.get(keys::COUNT_FIELD), Some(&50.0));
    }

    #[tokio::test]
    async fn concurrent_admits_never_exceed_ceiling() {
        let rl = Arc::new(limiter());
        let now = at(8, 30, 0);
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let rl = Arc::clone(&rl);
                tokio::spawn(async move { rl.admit_at("u1", Tier::Default, now).await.unwrap() })
            })
            .collect();
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[test]
    fn retry_after_is_positive() {
        assert_eq!(secs_to_next_minute(at(0, 0, 0)), Duration::from_secs(60));
        assert_eq!(secs_to_next_minute(at(0, 0, 59)), Duration::from_secs(1));
        assert_eq!(secs_to_next_day(at(0, 0, 0)), Duration::from_secs(86_400));
    }
}
