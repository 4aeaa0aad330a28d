//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the tick loop, the notification worker and the reporter
//! never contend on a mutex. Reporting is the only operation that resets
//! counters (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Ticks that ran to completion (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    /// Ticks that found tracking disabled or no active place (monotonic)
    ticks_idle: AtomicU64,
    /// Ticks rejected by the single-flight guard (monotonic)
    ticks_skipped: AtomicU64,
    /// Ticks dropped mid-flight by a lifecycle command (monotonic)
    ticks_cancelled: AtomicU64,
    /// Sum of tick latencies in microseconds (reset on report)
    tick_latency_sum_us: AtomicU64,
    /// Max tick latency in microseconds (reset on report)
    tick_latency_max_us: AtomicU64,
    /// Tick latency histogram buckets (reset on report)
    tick_latency_buckets: [AtomicU64; NUM_BUCKETS],
    anchors_acquired: AtomicU64,
    anchors_snapped: AtomicU64,
    anchor_failures: AtomicU64,
    sensor_fallbacks: AtomicU64,
    place_entries: AtomicU64,
    place_exits: AtomicU64,
    notifications_dispatched: AtomicU64,
    notifications_deduplicated: AtomicU64,
    /// Notifications lost because the dispatch channel was full or closed
    notifications_dropped: AtomicU64,
    /// Notifications the display service rejected
    notifications_failed: AtomicU64,
    /// Monitored places (gauge, set by the orchestrator)
    active_places: AtomicU64,
    /// Places currently INSIDE (gauge, set by the orchestrator)
    inside_places: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            ticks_idle: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            ticks_cancelled: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            anchors_acquired: AtomicU64::new(0),
            anchors_snapped: AtomicU64::new(0),
            anchor_failures: AtomicU64::new(0),
            sensor_fallbacks: AtomicU64::new(0),
            place_entries: AtomicU64::new(0),
            place_exits: AtomicU64::new(0),
            notifications_dispatched: AtomicU64::new(0),
            notifications_deduplicated: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            active_places: AtomicU64::new(0),
            inside_places: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed tick with its commit-phase latency (lock-free)
    #[inline]
    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.tick_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.tick_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_tick_idle(&self) {
        self.ticks_idle.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_cancelled(&self) {
        self.ticks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_anchor_acquired(&self, snapped: bool) {
        self.anchors_acquired.fetch_add(1, Ordering::Relaxed);
        if snapped {
            self.anchors_snapped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_anchor_failure(&self) {
        self.anchor_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sensor_fallback(&self) {
        self.sensor_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_place_entry(&self) {
        self.place_entries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_place_exit(&self) {
        self.place_exits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_deduplicated(&self) {
        self.notifications_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the orchestrator's current place counts
    #[inline]
    pub fn set_place_gauges(&self, active: usize, inside: usize) {
        self.active_places.store(active as u64, Ordering::Relaxed);
        self.inside_places.store(inside as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ticks_cancelled(&self) -> u64 {
        self.ticks_cancelled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn anchor_failures(&self) -> u64 {
        self.anchor_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sensor_fallbacks(&self) -> u64 {
        self.sensor_fallbacks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_deduplicated(&self) -> u64 {
        self.notifications_deduplicated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn place_entries(&self) -> u64 {
        self.place_entries.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn place_exits(&self) -> u64 {
        self.place_exits.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let ticks_count = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.tick_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.tick_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.tick_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_per_min = if elapsed.as_secs_f64() > 0.0 {
            ticks_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if ticks_count > 0 { latency_sum / ticks_count } else { 0 };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_min,
            ticks_idle: self.ticks_idle.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            ticks_cancelled: self.ticks_cancelled.load(Ordering::Relaxed),
            avg_tick_latency_us: avg_latency,
            max_tick_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            active_places: self.active_places.load(Ordering::Relaxed) as usize,
            inside_places: self.inside_places.load(Ordering::Relaxed) as usize,
            anchors_acquired: self.anchors_acquired.load(Ordering::Relaxed),
            anchors_snapped: self.anchors_snapped.load(Ordering::Relaxed),
            anchor_failures: self.anchor_failures.load(Ordering::Relaxed),
            sensor_fallbacks: self.sensor_fallbacks.load(Ordering::Relaxed),
            place_entries: self.place_entries.load(Ordering::Relaxed),
            place_exits: self.place_exits.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            notifications_deduplicated: self.notifications_deduplicated.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_min: f64,
    pub ticks_idle: u64,
    pub ticks_skipped: u64,
    pub ticks_cancelled: u64,
    pub avg_tick_latency_us: u64,
    pub max_tick_latency_us: u64,
    /// Commit-phase latency histogram buckets, fix waits excluded
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub active_places: usize,
    pub inside_places: usize,
    pub anchors_acquired: u64,
    pub anchors_snapped: u64,
    pub anchor_failures: u64,
    pub sensor_fallbacks: u64,
    pub place_entries: u64,
    pub place_exits: u64,
    pub notifications_dispatched: u64,
    pub notifications_deduplicated: u64,
    pub notifications_dropped: u64,
    pub notifications_failed: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_min = format!("{:.1}", self.ticks_per_min),
            ticks_cancelled = %self.ticks_cancelled,
            avg_tick_us = %self.avg_tick_latency_us,
            p99_tick_us = %self.lat_p99_us,
            active_places = %self.active_places,
            inside_places = %self.inside_places,
            anchors = %self.anchors_acquired,
            anchors_snapped = %self.anchors_snapped,
            anchor_failures = %self.anchor_failures,
            sensor_fallbacks = %self.sensor_fallbacks,
            notifications = %self.notifications_dispatched,
            notifications_deduped = %self.notifications_deduplicated,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tick() {
        let metrics = Metrics::new();

        metrics.record_tick(100);
        assert_eq!(metrics.ticks_total(), 1);
        assert_eq!(metrics.tick_latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_tick(200);
        assert_eq!(metrics.ticks_total(), 2);
        assert_eq!(metrics.tick_latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_tick(100);
        metrics.record_tick(200);
        metrics.record_tick(300);
        metrics.record_anchor_acquired(true);
        metrics.record_anchor_acquired(false);
        metrics.record_notification_deduplicated();
        metrics.set_place_gauges(3, 1);

        let summary = metrics.report();

        assert_eq!(summary.ticks_total, 3);
        assert_eq!(summary.avg_tick_latency_us, 200);
        assert_eq!(summary.max_tick_latency_us, 300);
        assert_eq!(summary.active_places, 3);
        assert_eq!(summary.inside_places, 1);
        assert_eq!(summary.anchors_acquired, 2);
        assert_eq!(summary.anchors_snapped, 1);
        assert_eq!(summary.notifications_deduplicated, 1);

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.ticks_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.ticks_total(), 3);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.ticks_total, 0);
        assert_eq!(summary.avg_tick_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        for _ in 0..100 {
            metrics.record_tick(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    m.record_notification_dropped();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.notifications_dropped(), 4000);
    }
}
