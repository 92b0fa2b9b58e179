//! Nanomatch Exchange - the exchange-side pipeline
//!
//! Three stages on dedicated threads, wired by SPSC rings from
//! `nanomatch-core`:
//!
//! - [`order_server::OrderServer`] - TCP order entry, produces client
//!   requests and consumes client responses
//! - [`matcher::MatchingEngine`] - consumes requests, matches against
//!   per-ticker price-time books, produces responses and market updates
//! - [`market_data::MarketDataPublisher`] - consumes market updates,
//!   publishes incremental and snapshot UDP multicast streams
//!
//! Every stage follows the same lifecycle: `new` takes its ring endpoints,
//! `start` spawns the pinned thread, `stop` flips the running flag, drains
//! cooperatively, and joins.

pub mod market_data;
pub mod matcher;
pub mod order_server;

pub use market_data::MarketDataPublisher;
pub use matcher::MatchingEngine;
pub use order_server::OrderServer;
