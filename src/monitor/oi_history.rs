// =============================================================================
// OI History — per-symbol sliding window of open-interest samples
// =============================================================================
//
// Sampling is periodic (about once per tick) while comparison offsets are
// fixed (15m, 30m), so an exact timestamp match is never available.  Lookups
// accept any sample inside `[now - offset - tolerance, now - offset]` and pick
// the most recent one.  No qualifying sample yields `None`, which callers must
// treat as "no data yet" rather than as a zero reference.
//
// Samples are kept ordered by timestamp.  A history is owned by exactly one
// monitoring session and is never shared.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// A single open-interest observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OiSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Time-ordered OI samples for one symbol plus its alert cooldown anchor.
#[derive(Debug, Clone, Default)]
pub struct SymbolOiHistory {
    samples: VecDeque<OiSample>,
    last_alert_at: Option<DateTime<Utc>>,
}

impl SymbolOiHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a single observation.
    pub fn seeded(timestamp: DateTime<Utc>, value: f64) -> Self {
        let mut history = Self::new();
        history.record(timestamp, value);
        history
    }

    /// Append a sample.
    ///
    /// Samples arrive in time order in practice, so this is a push to the
    /// back. A late sample is inserted at its ordered position instead.
    pub fn record(&mut self, timestamp: DateTime<Utc>, value: f64) {
        let sample = OiSample { timestamp, value };
        match self.samples.back() {
            Some(last) if timestamp < last.timestamp => {
                let at = self.samples.partition_point(|s| s.timestamp <= timestamp);
                self.samples.insert(at, sample);
            }
            _ => self.samples.push_back(sample),
        }
    }

    /// Drop every sample at or before `now - retention`.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) {
        let cutoff = now - retention;
        while let Some(front) = self.samples.front() {
            if front.timestamp <= cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent sample whose timestamp lies within
    /// `[now - offset - tolerance, now - offset]`.
    pub fn value_near(
        &self,
        now: DateTime<Utc>,
        offset: Duration,
        tolerance: Duration,
    ) -> Option<OiSample> {
        let newest = now - offset;
        let oldest = newest - tolerance;
        self.samples
            .iter()
            .rev()
            .skip_while(|s| s.timestamp > newest)
            .take_while(|s| s.timestamp >= oldest)
            .next()
            .copied()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<OiSample> {
        self.samples.back().copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.last_alert_at
    }

    pub fn mark_alerted(&mut self, at: DateTime<Utc>) {
        self.last_alert_at = Some(at);
    }

    #[cfg(test)]
    pub fn samples(&self) -> impl Iterator<Item = &OiSample> {
        self.samples.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
