//! Performance dashboard - periodic metrics publication
//!
//! A background reporter thread samples the latency histogram every 100ms,
//! refreshes the average / P99 / P99.9 gauges, derives orders-per-second
//! and trades-per-second once per elapsed wall-second, and every tenth
//! tick (roughly once per second) emits a [`PerfSnapshot`] to the
//! configured sink. The default sink is a `tracing` log line; sink errors
//! are logged and swallowed, never fatal.
//!
//! `start` is a no-op while the reporter is running and `stop` may be
//! called any number of times; dropping the dashboard stops it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::perf::latency::LatencyHistogram;
use crate::perf::timer;

/// Reporter cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Snapshots are emitted every this many ticks.
const TICKS_PER_EMIT: u64 = 10;

/// Point-in-time view of pipeline performance. All fields are u64 gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfSnapshot {
    pub orders_per_second: u64,
    pub trades_per_second: u64,
    pub avg_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub p99_9_latency_ns: u64,
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: u64,
}

impl std::fmt::Display for PerfSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "orders/s:{} trades/s:{} avg:{}ns p99:{}ns p99.9:{}ns mem:{}B cpu:{}%",
            self.orders_per_second,
            self.trades_per_second,
            self.avg_latency_ns,
            self.p99_latency_ns,
            self.p99_9_latency_ns,
            self.memory_usage_bytes,
            self.cpu_usage_percent
        )
    }
}

/// Cheap clonable handle for reporting executed trades to the dashboard.
#[derive(Clone, Default)]
pub struct TradeCounter(Arc<AtomicU64>);

impl TradeCounter {
    /// Count one executed trade.
    #[inline(always)]
    pub fn record_trade(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Trades counted so far.
    #[inline]
    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Snapshot destination. Errors are logged by the reporter and ignored.
pub type MetricsSink = Box<dyn Fn(&PerfSnapshot) -> Result<()> + Send + Sync>;

/// Optional provider of (memory bytes, cpu percent) host telemetry.
pub type TelemetryProbe = Box<dyn Fn() -> (u64, u64) + Send + Sync>;

struct DashboardShared {
    histogram: Arc<LatencyHistogram>,
    trades: Arc<AtomicU64>,
    running: AtomicBool,
    orders_per_second: AtomicU64,
    trades_per_second: AtomicU64,
    avg_latency_ns: AtomicU64,
    p99_latency_ns: AtomicU64,
    p99_9_latency_ns: AtomicU64,
    memory_usage_bytes: AtomicU64,
    cpu_usage_percent: AtomicU64,
    sink: MetricsSink,
    telemetry: Option<TelemetryProbe>,
}

impl DashboardShared {
    fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            orders_per_second: self.orders_per_second.load(Ordering::Relaxed),
            trades_per_second: self.trades_per_second.load(Ordering::Relaxed),
            avg_latency_ns: self.avg_latency_ns.load(Ordering::Relaxed),
            p99_latency_ns: self.p99_latency_ns.load(Ordering::Relaxed),
            p99_9_latency_ns: self.p99_9_latency_ns.load(Ordering::Relaxed),
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            cpu_usage_percent: self.cpu_usage_percent.load(Ordering::Relaxed),
        }
    }
}

/// Background metrics publisher over a shared [`LatencyHistogram`].
pub struct PerfDashboard {
    shared: Arc<DashboardShared>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl PerfDashboard {
    /// Dashboard over `histogram` with the default log-line sink.
    pub fn new(histogram: Arc<LatencyHistogram>) -> Self {
        Self::with_sink(
            histogram,
            Box::new(|snapshot| {
                tracing::info!(target: "nanomatch::metrics", %snapshot, "performance");
                Ok(())
            }),
        )
    }

    /// Dashboard emitting to a caller-supplied sink.
    pub fn with_sink(histogram: Arc<LatencyHistogram>, sink: MetricsSink) -> Self {
        Self {
            shared: Arc::new(DashboardShared {
                histogram,
                trades: Arc::new(AtomicU64::new(0)),
                running: AtomicBool::new(false),
                orders_per_second: AtomicU64::new(0),
                trades_per_second: AtomicU64::new(0),
                avg_latency_ns: AtomicU64::new(0),
                p99_latency_ns: AtomicU64::new(0),
                p99_9_latency_ns: AtomicU64::new(0),
                memory_usage_bytes: AtomicU64::new(0),
                cpu_usage_percent: AtomicU64::new(0),
                sink,
                telemetry: None,
            }),
            reporter: Mutex::new(None),
        }
    }

    /// Attach a host telemetry probe for the memory/CPU gauges.
    /// Without one they stay at zero.
    pub fn with_telemetry(mut self, probe: TelemetryProbe) -> Self {
        // Not yet started, so the Arc has no other holders.
        Arc::get_mut(&mut self.shared)
            .expect("telemetry must be attached before start")
            .telemetry = Some(probe);
        self
    }

    /// Handle for stages that execute trades.
    pub fn trade_counter(&self) -> TradeCounter {
        TradeCounter(Arc::clone(&self.shared.trades))
    }

    /// Spawn the reporter thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut reporter = self.reporter.lock();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("perf-dashboard".into())
            .spawn(move || reporter_loop(&shared))
            .context("failed to spawn perf-dashboard reporter")?;
        *reporter = Some(handle);
        Ok(())
    }

    /// Signal the reporter to halt and join it. Safe to call repeatedly.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.reporter.lock().take() {
            let _ = handle.join();
        }
    }

    /// Latest published gauges.
    pub fn snapshot(&self) -> PerfSnapshot {
        self.shared.snapshot()
    }
}

impl Drop for PerfDashboard {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reporter_loop(shared: &DashboardShared) {
    let mut tick = 0u64;
    let mut last_second_ns = timer::now_ns();
    let mut last_ops = shared.histogram.total_ops();
    let mut last_trades = shared.trades.load(Ordering::Relaxed);

    while shared.running.load(Ordering::Acquire) {
        thread::sleep(TICK_INTERVAL);
        tick += 1;

        let histogram = &shared.histogram;
        shared
            .avg_latency_ns
            .store(histogram.average(), Ordering::Relaxed);
        shared
            .p99_latency_ns
            .store(histogram.percentile(99.0), Ordering::Relaxed);
        shared
            .p99_9_latency_ns
            .store(histogram.percentile(99.9), Ordering::Relaxed);

        let now_ns = timer::now_ns();
        let elapsed_ns = now_ns.saturating_sub(last_second_ns);
        if elapsed_ns >= 1_000_000_000 {
            let ops = histogram.total_ops();
            let trades = shared.trades.load(Ordering::Relaxed);
            shared.orders_per_second.store(
                per_second(ops.saturating_sub(last_ops), elapsed_ns),
                Ordering::Relaxed,
            );
            shared.trades_per_second.store(
                per_second(trades.saturating_sub(last_trades), elapsed_ns),
                Ordering::Relaxed,
            );
            last_ops = ops;
            last_trades = trades;
            last_second_ns = now_ns;
        }

        if let Some(probe) = &shared.telemetry {
            let (memory_bytes, cpu_percent) = probe();
            shared
                .memory_usage_bytes
                .store(memory_bytes, Ordering::Relaxed);
            shared
                .cpu_usage_percent
                .store(cpu_percent, Ordering::Relaxed);
        }

        if tick % TICKS_PER_EMIT == 0 {
            let snapshot = shared.snapshot();
            if let Err(error) = (shared.sink)(&snapshot) {
                tracing::warn!(%error, "metrics sink failed; continuing");
            }
        }
    }
}

#[inline]
fn per_second(delta: u64, elapsed_ns: u64) -> u64 {
    (delta as u128 * 1_000_000_000 / elapsed_ns as u128) as u64
}
