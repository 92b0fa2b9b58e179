//! Shared vocabulary of the exchange pipeline
//!
//! The identifier/price/quantity aliases and the three message families
//! that flow through the rings: client requests, client responses, and
//! market updates. All message types are `Copy + Default` so they can
//! pre-fill ring and pool slots.

pub mod messages;
pub mod types;

pub use messages::{
    ClientRequest, ClientRequestKind, ClientResponse, ClientResponseKind, MarketUpdate,
    MarketUpdateKind, SeqClientRequest, SeqClientResponse, SeqMarketUpdate,
};
pub use types::{ClientId, OrderId, Price, Priority, Qty, Side, TickerId};
