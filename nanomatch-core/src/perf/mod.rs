//! Performance primitives
//!
//! Everything the pipeline's hot paths are built from: TSC-backed timing,
//! lock-free object pooling, SPSC rings, the latency histogram, the
//! dashboard that reports on it, and CPU pinning for the stage threads.

pub mod cpu;
pub mod dashboard;
pub mod latency;
pub mod pools;
pub mod spsc;
pub mod timer;

pub use cpu::{num_cores, pin_to_core, set_realtime_priority};
pub use dashboard::{PerfDashboard, PerfSnapshot, TradeCounter};
pub use latency::LatencyHistogram;
pub use pools::{MemPool, PoolHandle};
