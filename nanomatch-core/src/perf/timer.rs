//! Nanosecond timestamps from the cycle counter
//!
//! [`now_ns`] serves monotonic nanoseconds by dividing the CPU's cycle
//! counter by a calibrated cycles-per-nanosecond ratio, avoiding a system
//! call per timestamp. Calibration happens lazily on the first request:
//! it samples the cycle counter against `Instant` across a >=100ms sleep
//! and publishes the ratio once.
//!
//! On x86_64 the counter is `rdtsc`, which on every deployment target we
//! care about is invariant to frequency scaling. On other architectures
//! [`cycles`] falls back to the OS monotonic clock in nanoseconds, so the
//! ratio calibrates to ~1.0 and only precision differs - downstream
//! latency math is unaffected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Wall-clock window sampled by one calibration pass.
const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

// f64 ratio stored as raw bits; written once under the calibration lock.
static CYCLES_PER_NS_BITS: AtomicU64 = AtomicU64::new(0);
static CALIBRATED: AtomicBool = AtomicBool::new(false);
static CALIBRATION_LOCK: Mutex<()> = Mutex::new(());

/// Read the raw cycle counter.
#[inline(always)]
pub fn cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        monotonic_fallback_ns()
    }
}

/// Monotonic clock stand-in for architectures without a stable invariant TSC.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn monotonic_fallback_ns() -> u64 {
    use std::sync::OnceLock;
    static BASE: OnceLock<Instant> = OnceLock::new();
    let base = *BASE.get_or_init(Instant::now);
    base.elapsed().as_nanos() as u64
}

/// Current monotonic timestamp in nanoseconds.
///
/// Calibrates on first use; never returns before a positive finite ratio
/// has been published.
#[inline(always)]
pub fn now_ns() -> u64 {
    if !CALIBRATED.load(Ordering::Acquire) {
        calibrate();
    }
    let ratio = f64::from_bits(CYCLES_PER_NS_BITS.load(Ordering::Relaxed));
    (cycles() as f64 / ratio) as u64
}

/// Convert a cycle-count delta to nanoseconds.
#[inline(always)]
pub fn cycles_to_ns(cycle_delta: u64) -> u64 {
    if !CALIBRATED.load(Ordering::Acquire) {
        calibrate();
    }
    let ratio = f64::from_bits(CYCLES_PER_NS_BITS.load(Ordering::Relaxed));
    (cycle_delta as f64 / ratio) as u64
}

/// Measure the cycle counter against the wall clock and publish the ratio.
///
/// Idempotent: returns immediately once calibrated. Concurrent callers
/// serialize on a lock so the ratio is computed and published exactly once.
/// A degenerate sample (clock went backwards, zero cycle delta) is retried
/// rather than surfaced; the published ratio is always positive and finite.
pub fn calibrate() {
    if CALIBRATED.load(Ordering::Acquire) {
        return;
    }
    let _guard = CALIBRATION_LOCK.lock();
    if CALIBRATED.load(Ordering::Acquire) {
        return;
    }

    loop {
        let wall_start = Instant::now();
        let cycles_start = cycles();
        thread::sleep(CALIBRATION_WINDOW);
        let wall_ns = wall_start.elapsed().as_nanos() as u64;
        let cycle_delta = cycles().wrapping_sub(cycles_start);

        if wall_ns < CALIBRATION_WINDOW.as_nanos() as u64 || cycle_delta == 0 {
            tracing::warn!(wall_ns, cycle_delta, "timer calibration sample unusable, retrying");
            continue;
        }

        let ratio = cycle_delta as f64 / wall_ns as f64;
        if ratio.is_finite() && ratio > 0.0 {
            CYCLES_PER_NS_BITS.store(ratio.to_bits(), Ordering::Release);
            CALIBRATED.store(true, Ordering::Release);
            tracing::debug!(cycles_per_ns = ratio, "timer calibrated");
            return;
        }
    }
}

/// Discard the current calibration and measure again.
///
/// Useful after a suspend/resume or when migrating to a host where the
/// previous ratio no longer holds.
pub fn force_recalibrate() {
    {
        let _guard = CALIBRATION_LOCK.lock();
        CALIBRATED.store(false, Ordering::Release);
    }
    calibrate();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ns_monotonic_within_thread() {
        let mut prev = now_ns();
        for _ in 0..1_000 {
            let current = now_ns();
            assert!(current >= prev, "timestamp went backwards: {prev} -> {current}");
            prev = current;
        }
    }

    #[test]
    fn test_calibrate_idempotent() {
        calibrate();
        let ratio_bits = CYCLES_PER_NS_BITS.load(Ordering::Relaxed);
        calibrate();
        assert_eq!(CYCLES_PER_NS_BITS.load(Ordering::Relaxed), ratio_bits);
        assert!(f64::from_bits(ratio_bits) > 0.0);
    }

    #[test]
    fn test_elapsed_tracks_wall_clock() {
        calibrate();
        let start = now_ns();
        thread::sleep(Duration::from_millis(50));
        let elapsed = now_ns() - start;
        // Generous bounds: scheduling jitter, but nowhere near 10x off.
        assert!(elapsed >= 40_000_000, "elapsed only {elapsed} ns");
        assert!(elapsed < 500_000_000, "elapsed {elapsed} ns");
    }

    #[test]
    fn test_cycles_to_ns_scales() {
        calibrate();
        let c0 = cycles();
        thread::sleep(Duration::from_millis(20));
        let delta_ns = cycles_to_ns(cycles().wrapping_sub(c0));
        assert!(delta_ns >= 10_000_000, "delta only {delta_ns} ns");
    }
}
