//! Lock-free latency histogram
//!
//! 1000 buckets of 1 microsecond width, each tracking count / sum / min /
//! max in atomics on their own cache lines; values at or beyond the last
//! bucket's edge saturate into bucket 999. All updates are relaxed: the
//! histogram is a statistical structure, cross-field consistency is not a
//! requirement, and readers (the dashboard, shutdown summaries) tolerate
//! momentary skew between the per-bucket counters and the totals.
//!
//! Min and max move through compare-exchange-weak loops, so they are
//! monotone even under many concurrent writers.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Number of histogram buckets.
pub const NUM_BUCKETS: usize = 1_000;
/// Width of each bucket in nanoseconds.
pub const BUCKET_WIDTH_NS: u64 = 1_000;

struct Bucket {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn record(&self, latency_ns: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(latency_ns, Ordering::Relaxed);

        let mut current_min = self.min.load(Ordering::Relaxed);
        while latency_ns < current_min {
            match self.min.compare_exchange_weak(
                current_min,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_min = observed,
            }
        }

        let mut current_max = self.max.load(Ordering::Relaxed);
        while latency_ns > current_max {
            match self.max.compare_exchange_weak(
                current_max,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

/// Many-writer many-reader latency histogram.
///
/// Construct one at startup and pass it (behind an `Arc`) into every stage
/// that records or reports.
pub struct LatencyHistogram {
    buckets: Box<[CachePadded<Bucket>]>,
    total_ops: CachePadded<AtomicU64>,
    total_ns: CachePadded<AtomicU64>,
}

impl LatencyHistogram {
    /// Zero-initialized histogram.
    pub fn new() -> Self {
        let buckets: Box<[CachePadded<Bucket>]> = (0..NUM_BUCKETS)
            .map(|_| CachePadded::new(Bucket::new()))
            .collect();

        Self {
            buckets,
            total_ops: CachePadded::new(AtomicU64::new(0)),
            total_ns: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Record one latency observation in nanoseconds.
    #[inline(always)]
    pub fn record(&self, latency_ns: u64) {
        let bucket = ((latency_ns / BUCKET_WIDTH_NS) as usize).min(NUM_BUCKETS - 1);
        self.buckets[bucket].record(latency_ns);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    /// Observations recorded since construction or the last reset.
    #[inline]
    pub fn total_ops(&self) -> u64 {
        self.total_ops.load(Ordering::Relaxed)
    }

    /// Mean latency in nanoseconds, 0 when empty.
    pub fn average(&self) -> u64 {
        let ops = self.total_ops.load(Ordering::Relaxed);
        if ops == 0 {
            return 0;
        }
        self.total_ns.load(Ordering::Relaxed) / ops
    }

    /// Smallest recorded latency, 0 when empty. Skips empty buckets.
    pub fn min_latency(&self) -> u64 {
        let mut min = u64::MAX;
        for bucket in self.buckets.iter() {
            if bucket.count.load(Ordering::Relaxed) > 0 {
                min = min.min(bucket.min.load(Ordering::Relaxed));
            }
        }
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Largest recorded latency, 0 when empty. Skips empty buckets.
    pub fn max_latency(&self) -> u64 {
        let mut max = 0;
        for bucket in self.buckets.iter() {
            if bucket.count.load(Ordering::Relaxed) > 0 {
                max = max.max(bucket.max.load(Ordering::Relaxed));
            }
        }
        max
    }

    /// Latency below which `percentile` percent of observations fall,
    /// reported as the containing bucket's lower edge.
    ///
    /// Returns 0 on an empty histogram. Under concurrent recording the
    /// walk can under-run the total; the last bucket's lower edge is
    /// returned in that case.
    pub fn percentile(&self, percentile: f64) -> u64 {
        let total = self.total_ops.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = (total as f64 * percentile / 100.0) as u64;
        let mut accumulated = 0u64;
        for (index, bucket) in self.buckets.iter().enumerate() {
            accumulated += bucket.count.load(Ordering::Relaxed);
            if accumulated >= target {
                return index as u64 * BUCKET_WIDTH_NS;
            }
        }

        (NUM_BUCKETS as u64 - 1) * BUCKET_WIDTH_NS
    }

    /// Count of observations that landed in bucket `index`.
    pub fn bucket_count(&self, index: usize) -> u64 {
        self.buckets[index].count.load(Ordering::Relaxed)
    }

    /// Zero every bucket and the totals.
    pub fn reset(&self) {
        for bucket in self.buckets.iter() {
            bucket.reset();
        }
        self.total_ops.store(0, Ordering::Relaxed);
        self.total_ns.store(0, Ordering::Relaxed);
    }

    /// One-line statistics summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "LatencyStats{{ops:{}, avg:{}ns, min:{}ns, max:{}ns, p99:{}ns, p99.9:{}ns}}",
            self.total_ops(),
            self.average(),
            self.min_latency(),
            self.max_latency(),
            self.percentile(99.0),
            self.percentile(99.9),
        )
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
