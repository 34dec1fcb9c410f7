//! Per-client sliding-window admission control.
//!
//! Each client identifier owns a [`RateRecord`] holding the instants of its
//! recently admitted requests. A request is admitted while the weight of the
//! admissions inside the trailing window stays below the limit. Every
//! successful admission also sweeps records that have gone idle, so memory
//! stays bounded by the set of clients active within one window.
//!
//! State lives in this process only. Several instances behind a load
//! balancer each enforce their own budget; the effective limit for a client
//! is then up to `instances * limit`.

use crate::config::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Admission history for one client.
#[derive(Debug, Clone)]
pub struct RateRecord {
    /// Admitted request instants, oldest first.
    pub timestamps: VecDeque<Instant>,
    /// Cost charged per admitted request.
    pub weight: u32,
}

impl RateRecord {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            weight: 1,
        }
    }

    /// Newest admission instant, if any.
    pub fn newest(&self) -> Option<Instant> {
        self.timestamps.back().copied()
    }

    /// True when the record has no admission inside the window ending at `now`.
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        match self.newest() {
            Some(newest) => !is_within_window(newest, now, window),
            None => true,
        }
    }
}

fn is_within_window(ts: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(ts) < window
}

/// Sliding-window weighted rate limiter keyed by client identifier.
pub struct RateLimiter {
    records: Mutex<HashMap<String, RateRecord>>,
    limit: u64,
    window: Duration,
    max_timestamps: usize,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_limits(config.limit, config.window(), config.max_timestamps)
    }

    /// Create a limiter with explicit limits.
    pub fn with_limits(limit: u32, window: Duration, max_timestamps: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            limit: u64::from(limit),
            window,
            max_timestamps: max_timestamps.max(1),
        }
    }

    /// Check and record a request from `client_id` at the current instant.
    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    /// Check and record a request from `client_id` at `now`.
    ///
    /// The filter, the budget check, the append and the sweep run under one
    /// lock, so concurrent requests from the same client cannot both slip
    /// under the limit.
    pub fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        // A panic elsewhere while holding the lock leaves the map usable.
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut record = records
            .get(client_id)
            .cloned()
            .unwrap_or_else(RateRecord::new);

        record
            .timestamps
            .retain(|ts| is_within_window(*ts, now, self.window));

        let total_weight = record.timestamps.len() as u64 * u64::from(record.weight);
        if total_weight >= self.limit {
            warn!(
                client = %client_id,
                weight = total_weight,
                limit = self.limit,
                "Rate limit exceeded"
            );
            return false;
        }

        record.timestamps.push_back(now);
        while record.timestamps.len() > self.max_timestamps {
            record.timestamps.pop_front();
        }
        records.insert(client_id.to_string(), record);

        let before = records.len();
        records.retain(|_, rec| !rec.is_stale(now, self.window));
        let pruned = before - records.len();
        if pruned > 0 {
            debug!(pruned, remaining = records.len(), "Pruned idle rate records");
        }

        true
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.records
            .lock()
            .map(|r| r.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    /// Snapshot of a client's record.
    pub fn record(&self, client_id: &str) -> Option<RateRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .cloned()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
