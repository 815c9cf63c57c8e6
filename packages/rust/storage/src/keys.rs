//! Cache key namespace.
//!
//! Every key lives under [`NAMESPACE`] and is built from `:`-joined parts:
//!
//! | Key | TTL |
//! |---|---|
//! | `paperbrief:paper:{id}:meta` | [`ttl::METADATA`] |
//! | `paperbrief:paper:{id}:summary:{model}:{version}` | [`ttl::SUMMARY`] |
//! | `paperbrief:paper:{id}:summary:{model}:{version}:lock` | configured lock TTL |
//! | `paperbrief:report:{id}:{model}:{version}` | [`ttl::REPORT`] |
//! | `paperbrief:cost:daily:{YYYY-MM-DD}` | [`ttl::COST_DAILY`] |
//! | `paperbrief:rate:{requester}:min:{epoch_minute}` | [`ttl::RATE_MINUTE`] |
//! | `paperbrief:rate:{requester}:day:{YYYY-MM-DD}` | [`ttl::RATE_DAY`] |

use chrono::NaiveDate;
use paperbrief_shared::ArxivId;

/// Fixed prefix shared by every key.
pub const NAMESPACE: &str = "paperbrief";

/// Lifetimes for each key family.
pub mod ttl {
    use std::time::Duration;

    const DAY: u64 = 24 * 60 * 60;

    pub const METADATA: Duration = Duration::from_secs(7 * DAY);
    pub const SUMMARY: Duration = Duration::from_secs(30 * DAY);
    pub const REPORT: Duration = Duration::from_secs(30 * DAY);
    pub const COST_DAILY: Duration = Duration::from_secs(90 * DAY);
    pub const RATE_MINUTE: Duration = Duration::from_secs(60);
    pub const RATE_DAY: Duration = Duration::from_secs(DAY);
}

/// Field names of the daily cost aggregate hash.
pub mod cost_fields {
    pub const TOKENS_IN: &str = "tokens_in";
    pub const TOKENS_OUT: &str = "tokens_out";
    pub const COST_ESTIMATED: &str = "cost_estimated";
    pub const RUNS: &str = "runs";
    pub const CACHE_HITS: &str = "cache_hits";
}

/// Field name used by single-counter keys such as rate windows.
pub const COUNT_FIELD: &str = "count";

fn key(parts: &[&str]) -> String {
    let mut out = String::from(NAMESPACE);
    for part in parts {
        out.push(':');
        out.push_str(part);
    }
    out
}

pub fn metadata(id: &ArxivId) -> String {
    key(&["paper", id.as_str(), "meta"])
}

pub fn summary(id: &ArxivId, model: &str, version: &str) -> String {
    key(&["paper", id.as_str(), "summary", model, version])
}

/// In-flight marker guarding a summary key.
pub fn summary_lock(id: &ArxivId, model: &str, version: &str) -> String {
    key(&["paper", id.as_str(), "summary", model, version, "lock"])
}

pub fn report(id: &ArxivId, model: &str, version: &str) -> String {
    key(&["report", id.as_str(), model, version])
}

pub fn cost_daily(date: NaiveDate) -> String {
    key(&["cost", "daily", &date.format("%Y-%m-%d").to_string()])
}

pub fn rate_minute(requester: &str, epoch_minute: i64) -> String {
    key(&["rate", requester, "min", &epoch_minute.to_string()])
}

pub fn rate_day(requester: &str, date: NaiveDate) -> String {
    key(&["rate", requester, "day", &date.format("%Y-%m-%d").to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns() {
        let id = ArxivId::parse("2401.01234v2").expect("parse");
        assert_eq!(metadata(&id), "paperbrief:paper:2401.01234:meta");
        assert_eq!(
            summary(&id, "gpt-4o-mini", "v1"),
            "paperbrief:paper:2401.01234:summary:gpt-4o-mini:v1"
        );
        assert_eq!(
            summary_lock(&id, "gpt-4o-mini", "v1"),
            "paperbrief:paper:2401.01234:summary:gpt-4o-mini:v1:lock"
        );
        assert_eq!(
            report(&id, "gpt-4o-mini", "v1"),
            "paperbrief:report:2401.01234:gpt-4o-mini:v1"
        );

        let date = NaiveDate::from_ymd_opt(2025, 3, 9).expect("date");
        assert_eq!(cost_daily(date), "paperbrief:cost:daily:2025-03-09");
        assert_eq!(rate_day("u1", date), "paperbrief:rate:u1:day:2025-03-09");
        assert_eq!(rate_minute("u1", 28_000_000), "paperbrief:rate:u1:min:28000000");
    }

    #[test]
    fn model_or_version_change_moves_summary_key() {
        let id = ArxivId::parse("2401.01234").expect("parse");
        let base = summary(&id, "gpt-4o-mini", "v1");
        assert_ne!(base, summary(&id, "gpt-4o", "v1"));
        assert_ne!(base, summary(&id, "gpt-4o-mini", "v2"));
    }

    #[test]
    fn ttls() {
        assert_eq!(ttl::METADATA.as_secs(), 604_800);
        assert_eq!(ttl::SUMMARY.as_secs(), 2_592_000);
        assert_eq!(ttl::COST_DAILY.as_secs(), 7_776_000);
        assert_eq!(ttl::RATE_MINUTE.as_secs(), 60);
        assert_eq!(ttl::RATE_DAY.as_secs(), 86_400);
    }
}
