//! Lock-free metrics collection and periodic reporting
//!
//! Every counter is an `AtomicU64` so the ingest task, the session loop and
//! the HTTP server can all touch them without a lock. Only `report()`
//! resets anything, and it does so with atomic swaps.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must never drive reconciliation decisions.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for reading processing latency (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

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

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (slot, bucket) in result.iter_mut().zip(buckets.iter()) {
        *slot = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (slot, bucket) in result.iter_mut().zip(buckets.iter()) {
        *slot = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Overflow bucket reports twice the last bound
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
    /// Readings pulled off the transport (monotonic)
    readings_received: AtomicU64,
    /// Readings accepted by the session (monotonic)
    readings_processed: AtomicU64,
    /// Readings accepted since last report (reset on report)
    processed_since_report: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    /// Periodic latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Cumulative latency histogram, exported on /metrics
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    latency_sum_total_us: AtomicU64,
    readings_dropped: AtomicU64,
    out_of_order: AtomicU64,
    malformed: AtomicU64,
    unknown_device: AtomicU64,
    lookup_failures: AtomicU64,
    epc_decode_failures: AtomicU64,
    remove_failures: AtomicU64,
    suspect_lists_emitted: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_received: AtomicU64::new(0),
            readings_processed: AtomicU64::new(0),
            processed_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            latency_buckets_total: Default::default(),
            latency_sum_total_us: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unknown_device: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            epc_decode_failures: AtomicU64::new(0),
            remove_failures: AtomicU64::new(0),
            suspect_lists_emitted: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_reading_received(&self) {
        self.readings_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reading applied by the session along with its processing time
    #[inline]
    pub fn record_reading_processed(&self, latency_us: u64) {
        self.readings_processed.fetch_add(1, Ordering::Relaxed);
        self.processed_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Reading dropped because the session channel was full
    #[inline]
    pub fn record_reading_dropped(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_device(&self) {
        self.unknown_device.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_epc_decode_failure(&self) {
        self.epc_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_remove_failure(&self) {
        self.remove_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_suspect_list_emitted(&self) {
        self.suspect_lists_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn readings_received(&self) -> u64 {
        self.readings_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn readings_processed(&self) -> u64 {
        self.readings_processed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn readings_dropped(&self) -> u64 {
        self.readings_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn suspect_lists_emitted(&self) -> u64 {
        self.suspect_lists_emitted.load(Ordering::Relaxed)
    }

    /// Cumulative view for Prometheus scraping. Does not reset anything.
    pub fn totals(&self) -> MetricsTotals {
        MetricsTotals {
            readings_received: self.readings_received.load(Ordering::Relaxed),
            readings_processed: self.readings_processed.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_device: self.unknown_device.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            epc_decode_failures: self.epc_decode_failures.load(Ordering::Relaxed),
            remove_failures: self.remove_failures.load(Ordering::Relaxed),
            suspect_lists_emitted: self.suspect_lists_emitted.load(Ordering::Relaxed),
            lat_buckets: load_buckets(&self.latency_buckets_total),
            lat_sum_us: self.latency_sum_total_us.load(Ordering::Relaxed),
        }
    }

    /// Calculate the periodic summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let processed = self.processed_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let readings_per_sec = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if processed > 0 { latency_sum / processed } else { 0 };

        MetricsSummary {
            readings_received: self.readings_received.load(Ordering::Relaxed),
            readings_processed: self.readings_processed.load(Ordering::Relaxed),
            readings_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_device: self.unknown_device.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            epc_decode_failures: self.epc_decode_failures.load(Ordering::Relaxed),
            remove_failures: self.remove_failures.load(Ordering::Relaxed),
            suspect_lists_emitted: self.suspect_lists_emitted.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

/// Periodic metrics snapshot, logged and published on the metrics topic
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub readings_received: u64,
    pub readings_processed: u64,
    pub readings_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub readings_dropped: u64,
    pub out_of_order: u64,
    pub malformed: u64,
    pub unknown_device: u64,
    pub lookup_failures: u64,
    pub epc_decode_failures: u64,
    pub remove_failures: u64,
    pub suspect_lists_emitted: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            readings_received = %self.readings_received,
            readings_processed = %self.readings_processed,
            readings_per_sec = format!("{:.1}", self.readings_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            dropped = %self.readings_dropped,
            out_of_order = %self.out_of_order,
            malformed = %self.malformed,
            suspect_lists = %self.suspect_lists_emitted,
            "metrics"
        );
    }
}

/// Monotonic counters as scraped by Prometheus
#[derive(Debug, Clone)]
pub struct MetricsTotals {
    pub readings_received: u64,
    pub readings_processed: u64,
    pub readings_dropped: u64,
    pub out_of_order: u64,
    pub malformed: u64,
    pub unknown_device: u64,
    pub lookup_failures: u64,
    pub epc_decode_failures: u64,
    pub remove_failures: u64,
    pub suspect_lists_emitted: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_sum_us: u64,
}
