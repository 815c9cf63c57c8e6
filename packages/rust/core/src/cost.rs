//! Token pricing and the daily cost aggregate.
//!
//! The aggregate is a counter hash in the cache layer, updated only through
//! `incr_by`, so concurrent runs never overwrite each other's totals.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use paperbrief_shared::{AppConfig, CostRecord, ModelPricing, Result};
use paperbrief_storage::{CacheStore, keys};
use serde::Serialize;

/// Rates used for models missing from the table.
const MINI_RATES: ModelPricing = ModelPricing {
    input_per_1k: 0.00015,
    output_per_1k: 0.0006,
};
const LARGE_RATES: ModelPricing = ModelPricing {
    input_per_1k: 0.03,
    output_per_1k: 0.06,
};

/// Per-model USD prices.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
}

impl From<&AppConfig> for PricingTable {
    fn from(config: &AppConfig) -> Self {
        Self {
            models: config.pricing.clone(),
        }
    }
}

impl PricingTable {
    pub fn new(models: BTreeMap<String, ModelPricing>) -> Self {
        Self { models }
    }

    /// Rates for `model`. Unknown `gpt-4*` models that are not `mini`
    /// variants get the large-model rates, everything else the mini rates.
    pub fn rates(&self, model: &str) -> ModelPricing {
        if let Some(p) = self.models.get(model) {
            return *p;
        }
        if model.contains("gpt-4") && !model.contains("mini") {
            LARGE_RATES
        } else {
            MINI_RATES
        }
    }

    /// Estimated USD cost of one invocation.
    pub fn estimate(&self, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        let rates = self.rates(model);
        (tokens_in as f64 / 1000.0) * rates.input_per_1k
            + (tokens_out as f64 / 1000.0) * rates.output_per_1k
    }
}

/// Totals for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_estimated: f64,
    pub runs: u64,
    pub cache_hits: u64,
}

/// Fold one run's record into the aggregate for `date`.
pub async fn record_daily(cache: &dyn CacheStore, date: NaiveDate, record: &CostRecord) -> Result<()> {
    let key = keys::cost_daily(date);
    let ttl = keys::ttl::COST_DAILY;
    let updates = [
        (keys::cost_fields::TOKENS_IN, record.tokens_in as f64),
        (keys::cost_fields::TOKENS_OUT, record.tokens_out as f64),
        (keys::cost_fields::COST_ESTIMATED, record.cost_estimated),
        (keys::cost_fields::RUNS, 1.0),
        (
            keys::cost_fields::CACHE_HITS,
            if record.cache_hit { 1.0 } else { 0.0 },
        ),
    ];
    for (field, amount) in updates {
        cache.incr_by(&key, field, amount, ttl).await?;
    }
    Ok(())
}

/// Read the aggregate for `date`. Missing days read as zeros.
pub async fn daily_cost(cache: &dyn CacheStore, date: NaiveDate) -> Result<DailyCost> {
    let fields = cache.get_fields(&keys::cost_daily(date)).await?;
    let int = |name: &str| fields.get(name).copied().unwrap_or(0.0).round() as u64;
    Ok(DailyCost {
        date,
        tokens_in: int(keys::cost_fields::TOKENS_IN),
        tokens_out: int(keys::cost_fields::TOKENS_OUT),
        cost_estimated: fields
            .get(keys::cost_fields::COST_ESTIMATED)
            .copied()
            .unwrap_or(0.0),
        runs: int(keys::cost_fields::RUNS),
        cache_hits: int(keys::cost_fields::CACHE_HITS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperbrief_storage::MemoryCache;
    use std::sync::Arc;

    #[test]
    fn known_and_fallback_rates() {
        let table = PricingTable::from(&AppConfig::default());
        let cost = table.estimate("gpt-4o-mini", 1000, 1000);
        assert!((cost - 0.00075).abs() < 1e-12);

        assert_eq!(table.rates("gpt-4-turbo"), LARGE_RATES);
        assert_eq!(table.rates("gpt-4.1-mini"), MINI_RATES);
        assert_eq!(table.rates("llama-3.1-8b"), MINI_RATES);
    }

    #[tokio::test]
    async fn aggregate_is_additive() {
        let cache = MemoryCache::new();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).expect("date");

        let mut first = CostRecord::new("gpt-4o-mini");
        first.add_usage(1000, 200, 0.00027);
        record_daily(&cache, date, &first).await.expect("record");

        let mut hit = CostRecord::new("gpt-4o-mini");
        hit.cache_hit = true;
        record_daily(&cache, date, &hit).await.expect("record");

        let daily = daily_cost(&cache, date).await.expect("read");
        assert_eq!(daily.tokens_in, 1000);
        assert_eq!(daily.tokens_out, 200);
        assert_eq!(daily.runs, 2);
        assert_eq!(daily.cache_hits, 1);
        assert!((daily.cost_estimated - 0.00027).abs() < 1e-12);
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_lose_updates() {
        let cache = Arc::new(MemoryCache::new());
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).expect("date");
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let mut record = CostRecord::new("gpt-4o-mini");
                record.add_usage(10, 5, 0.0);
                record_daily(cache.as_ref(), date, &record).await.expect("record");
            }));
        }
        for h in handles {
            h.await.expect("join");
        }
        let daily = daily_cost(cache.as_ref(), date).await.expect("read");
        assert_eq!(daily.tokens_in, 200);
        assert_eq!(daily.tokens_out, 100);
        assert_eq!(daily.runs, 20);
    }

    #[tokio::test]
    async fn missing_day_reads_as_zero() {
        let cache = MemoryCache::new();
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).expect("date");
        let daily = daily_cost(&cache, date).await.expect("read");
        assert_eq!(daily.runs, 0);
        assert_eq!(daily.date, date);
    }
}
