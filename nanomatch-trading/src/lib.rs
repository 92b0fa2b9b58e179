//! Nanomatch Trading - the client-side pipeline
//!
//! Mirror image of the exchange: three stages on dedicated threads wired
//! by SPSC rings.
//!
//! - [`gateway::OrderGateway`] - TCP client to the exchange's order
//!   server; consumes the requests ring, produces the responses ring
//! - [`consumer::MarketDataConsumer`] - joins the multicast groups and
//!   produces the market-updates ring
//! - [`engine::TradeEngine`] - consumes responses and market updates,
//!   runs the configured algo, produces requests
//!
//! Tick-to-trade latency is measured in the trade engine with the core
//! timer and recorded into the shared histogram.

pub mod algo;
pub mod consumer;
pub mod engine;
pub mod gateway;

pub use algo::{AlgoType, RiskCfg, TickerCfg};
pub use consumer::MarketDataConsumer;
pub use engine::TradeEngine;
pub use gateway::OrderGateway;
