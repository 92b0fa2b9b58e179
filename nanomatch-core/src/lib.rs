//! Nanomatch Core - Low-Latency Primitives for the Exchange Pipeline
//!
//! The building blocks every hot path in the exchange and the trading
//! client routes through: a TSC-backed nanosecond timer, a lock-free
//! object pool, an SPSC ring buffer, a bucketed latency histogram, and
//! the performance dashboard that reports on all of it.
//!
//! ## Pipeline Shape
//!
//! ```text
//!               client-requests                market-updates
//!  ┌────────────┐   (SPSC)    ┌────────────┐     (SPSC)    ┌────────────┐
//!  │   Order    │────────────▶│  Matching  │──────────────▶│ MarketData │
//!  │   Server   │◀────────────│   Engine   │               │ Publisher  │
//!  └────────────┘   (SPSC)    └────────────┘               └────────────┘
//!               client-responses
//! ```
//!
//! Each stage runs on its own thread, pinned to a core via [`perf::cpu`].
//! Every ring has exactly one producer thread and one consumer thread;
//! the [`perf::spsc`] handles make that a compile-time property.
//!
//! ## Design Principles
//!
//! - **Zero heap allocations** on the hot path - slots are pre-constructed
//!   at startup and reused through [`perf::pools::MemPool`]
//! - **Cache-line separation** of independently mutated atomics
//!   (`crossbeam::utils::CachePadded`) - prevents false sharing
//! - **Lock-free** operations everywhere a pipeline thread can touch;
//!   blocking is confined to timer calibration, pool back-off yields, and
//!   the dashboard's reporting cadence
//! - **Passed-in handles** instead of process globals - the histogram and
//!   dashboard are constructed at startup and threaded into the stages
//!   that need them
//!
//! ## Core Modules
//!
//! - [`perf`] - timer, pool, SPSC ring, histogram, dashboard, CPU pinning
//! - [`core`] - shared message vocabulary and wire codecs
//! - [`config`] - compile-time capacities and default endpoints
//! - [`resilience`] - signal-driven cooperative shutdown
//! - [`utils`] - logging initialization

pub mod config;
pub mod core;
pub mod perf;
pub mod resilience;
pub mod utils;

pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::constants::*;
    pub use crate::core::messages::{ClientRequest, ClientResponse, MarketUpdate};
    pub use crate::core::types::{ClientId, OrderId, Price, Priority, Qty, Side, TickerId};
    pub use crate::perf::dashboard::{PerfDashboard, PerfSnapshot};
    pub use crate::perf::latency::LatencyHistogram;
    pub use crate::perf::pools::MemPool;
    pub use crate::perf::spsc;
    pub use crate::perf::timer;
    pub use crate::resilience::KillSwitch;
    pub use crate::{Error, Result};
}
