// =============================================================================
// Rate-Limit Tracker — monitors Binance Futures request weight
// =============================================================================
//
// USDⓈ-M futures allow 2400 request weight per minute per IP.  Every active
// session polls every symbol each tick, so the budget is shared by all users.
// We hard-cap ourselves at 2000.
//
// The tracker reads the `X-MBX-USED-WEIGHT-1M` response header after every
// request and keeps an atomic counter that any task may query lock-free.
// The counter is stamped with the minute it was reported in; Binance resets
// the weight every minute, so a value from an earlier minute counts as zero.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::Utc;

use serde::Serialize;
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 2000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 1600;

/// Thread-safe request-weight tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    /// Unix minute in which `used_weight_1m` was reported.
    weight_minute: AtomicI64,
}

/// Immutable snapshot of the current rate-limit state.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub hard_limit: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            weight_minute: AtomicI64::new(0),
        }
    }

    fn current_minute() -> i64 {
        Utc::now().timestamp().div_euclid(60)
    }

    /// Weight used in `minute`. Zero once the reported minute has passed.
    fn weight_in(&self, minute: i64) -> u32 {
        if self.weight_minute.load(Ordering::Relaxed) == minute {
            self.used_weight_1m.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Update the counter from Binance response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        self.update_from_headers_at(headers, Self::current_minute());
    }

    fn update_from_headers_at(&self, headers: &reqwest::header::HeaderMap, minute: i64) {
        let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let prev = self.weight_in(minute);
        self.weight_minute.store(minute, Ordering::Relaxed);
        self.used_weight_1m.store(weight, Ordering::Relaxed);
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "rate-limit weight updated from header");
    }

    /// Return `true` if we can afford to spend `weight` more request weight
    /// without exceeding the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.can_send_request_at(weight, Self::current_minute())
    }

    fn can_send_request_at(&self, weight: u32, minute: i64) -> bool {
        let current = self.weight_in(minute);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.weight_in(Self::current_minute()),
            hard_limit: WEIGHT_HARD_LIMIT,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("weight_minute", &self.weight_minute.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers(weight: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_str(weight).unwrap());
        h
    }

    #[test]
    fn starts_empty() {
        let t = RateLimitTracker::new();
        assert_eq!(t.snapshot().used_weight_1m, 0);
        assert!(t.can_send_request(WEIGHT_HARD_LIMIT));
    }

    #[test]
    fn header_updates_weight() {
        let t = RateLimitTracker::new();
        t.update_from_headers_at(&headers("1234"), 100);
        assert_eq!(t.weight_in(100), 1234);
    }

    #[test]
    fn blocks_past_hard_limit() {
        let t = RateLimitTracker::new();
        t.update_from_headers_at(&headers("1995"), 100);
        assert!(t.can_send_request_at(5, 100));
        assert!(!t.can_send_request_at(6, 100));
    }

    #[test]
    fn exhausted_budget_recovers_next_minute() {
        let t = RateLimitTracker::new();
        let minute = 28_000_000;
        t.update_from_headers_at(&headers("2000"), minute);
        assert!(!t.can_send_request_at(1, minute));
        // No request went out, so no header refreshed the counter.
        assert!(t.can_send_request_at(1, minute + 1));
    }

    #[test]
    fn stale_weight_does_not_count() {
        let t = RateLimitTracker::new();
        t.update_from_headers_at(&headers("1990"), 100);
        assert_eq!(t.weight_in(100), 1990);
        assert_eq!(t.weight_in(101), 0);
        t.update_from_headers_at(&headers("7"), 101);
        assert_eq!(t.weight_in(101), 7);
    }

    #[test]
    fn garbage_header_is_ignored() {
        let t = RateLimitTracker::new();
        t.update_from_headers_at(&headers("12"), 100);
        t.update_from_headers_at(&headers("lots"), 100);
        t.update_from_headers_at(&HeaderMap::new(), 100);
        assert_eq!(t.weight_in(100), 12);
    }
}
