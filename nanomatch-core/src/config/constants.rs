//! Centralized constants for the exchange pipeline
//!
//! All sizing here is compile-time. The ring capacities feed the SPSC
//! masking arithmetic, so they are statically asserted to be powers of two.

// ===== PIPELINE CAPACITIES =====

/// Number of tickers the matching engine hosts.
pub const ME_MAX_TICKERS: usize = 8;

/// Capacity of the client-requests and client-responses rings.
pub const ME_MAX_CLIENT_UPDATES: usize = 256 * 1024;

/// Capacity of the market-updates ring.
pub const ME_MAX_MARKET_UPDATES: usize = 256 * 1024;

/// Resting orders the matching engine can hold across all books.
pub const ME_MAX_POOLED_ORDERS: usize = 16 * 1024;

const _: () = assert!(ME_MAX_CLIENT_UPDATES.is_power_of_two());
const _: () = assert!(ME_MAX_MARKET_UPDATES.is_power_of_two());
const _: () = assert!(ME_MAX_POOLED_ORDERS.is_power_of_two());

// ===== BACK-OFF BUDGETS =====

/// Pool acquire iterations before the searching thread starts yielding.
pub const POOL_YIELD_AFTER: usize = 10;

/// Pool acquire iterations before giving up and reporting exhaustion.
pub const POOL_ACQUIRE_HARD_CAP: usize = 1000;

// ===== DEFAULT ENDPOINTS =====

/// Order-entry TCP endpoint (exchange side binds, clients connect).
pub const ORDER_GW_ADDR: &str = "127.0.0.1:12345";

/// Snapshot market-data multicast group.
pub const SNAPSHOT_MCAST_IP: &str = "233.252.14.1";
/// Snapshot market-data multicast port.
pub const SNAPSHOT_MCAST_PORT: u16 = 20000;

/// Incremental market-data multicast group.
pub const INCREMENTAL_MCAST_IP: &str = "233.252.14.3";
/// Incremental market-data multicast port.
pub const INCREMENTAL_MCAST_PORT: u16 = 20001;

/// Interval between synthesized snapshot cycles on the snapshot group.
pub const SNAPSHOT_INTERVAL_NS: u64 = 5_000_000_000;
