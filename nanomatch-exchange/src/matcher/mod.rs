//! Matching engine stage
//!
//! Per-ticker price-time priority books ([`book::OrderBook`]) with resting
//! orders held in a lock-free `MemPool`, driven by the engine run loop
//! ([`engine::MatchingEngine`]) that consumes the client-requests ring and
//! produces responses and market updates.

pub mod book;
pub mod engine;

pub use book::{BookOrder, OrderBook};
pub use engine::{MatcherConfig, MatchingEngine};
