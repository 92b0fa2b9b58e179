//! Pipeline message types and their wire codecs
//!
//! Three message families flow through the SPSC rings and over the wire:
//!
//! - [`ClientRequest`]  - client → exchange (order entry)
//! - [`ClientResponse`] - exchange → client (order outcomes)
//! - [`MarketUpdate`]   - exchange → world (book and trade events)
//!
//! On the wire each message is a fixed-size little-endian frame, prefixed
//! with a `u64` sequence number by the [`SeqClientRequest`] /
//! [`SeqClientResponse`] / [`SeqMarketUpdate`] wrappers. Fixed frames keep
//! the gateway parsers allocation-free: a connection buffer is drained in
//! `ENCODED_LEN` chunks with no length negotiation.
//!
//! Decoders are total: an unknown tag byte yields `None`, never a panic.

use std::fmt;

use crate::core::types::{
    ClientId, OrderId, Price, Priority, Qty, Side, TickerId, CLIENT_ID_INVALID, ORDER_ID_INVALID,
    PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID, TICKER_ID_INVALID,
};

/// What a client asks the exchange to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientRequestKind {
    #[default]
    Invalid = 0,
    New = 1,
    Cancel = 2,
}

impl ClientRequestKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::New),
            2 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Order-entry request, client → exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: ClientRequestKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self {
            kind: ClientRequestKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientRequest[{:?} client:{} ticker:{} oid:{} {} {}@{}]",
            self.kind, self.client_id, self.ticker_id, self.order_id, self.side, self.qty,
            self.price
        )
    }
}

impl ClientRequest {
    /// Wire size of one encoded request.
    pub const ENCODED_LEN: usize = 30;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        let mut w = Writer::new(&mut buf);
        w.put_u8(self.kind as u8);
        w.put_u32(self.client_id);
        w.put_u32(self.ticker_id);
        w.put_u64(self.order_id);
        w.put_u8(self.side.to_u8());
        w.put_i64(self.price);
        w.put_u32(self.qty);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut r = Reader::new(buf, Self::ENCODED_LEN)?;
        Some(Self {
            kind: ClientRequestKind::from_u8(r.get_u8())?,
            client_id: r.get_u32(),
            ticker_id: r.get_u32(),
            order_id: r.get_u64(),
            side: Side::from_u8(r.get_u8())?,
            price: r.get_i64(),
            qty: r.get_u32(),
        })
    }
}

/// Outcome of a request, exchange → client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientResponseKind {
    #[default]
    Invalid = 0,
    Accepted = 1,
    Canceled = 2,
    Filled = 3,
    CancelRejected = 4,
}

impl ClientResponseKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Accepted),
            2 => Some(Self::Canceled),
            3 => Some(Self::Filled),
            4 => Some(Self::CancelRejected),
            _ => None,
        }
    }
}

/// Order outcome, exchange → client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ClientResponseKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub exec_qty: Qty,
    pub leaves_qty: Qty,
}

impl Default for ClientResponse {
    fn default() -> Self {
        Self {
            kind: ClientResponseKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: ORDER_ID_INVALID,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            exec_qty: QTY_INVALID,
            leaves_qty: QTY_INVALID,
        }
    }
}

impl fmt::Display for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientResponse[{:?} client:{} ticker:{} coid:{} moid:{} {} exec:{} leaves:{} @{}]",
            self.kind,
            self.client_id,
            self.ticker_id,
            self.client_order_id,
            self.market_order_id,
            self.side,
            self.exec_qty,
            self.leaves_qty,
            self.price
        )
    }
}

impl ClientResponse {
    /// Wire size of one encoded response.
    pub const ENCODED_LEN: usize = 42;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        let mut w = Writer::new(&mut buf);
        w.put_u8(self.kind as u8);
        w.put_u32(self.client_id);
        w.put_u32(self.ticker_id);
        w.put_u64(self.client_order_id);
        w.put_u64(self.market_order_id);
        w.put_u8(self.side.to_u8());
        w.put_i64(self.price);
        w.put_u32(self.exec_qty);
        w.put_u32(self.leaves_qty);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut r = Reader::new(buf, Self::ENCODED_LEN)?;
        Some(Self {
            kind: ClientResponseKind::from_u8(r.get_u8())?,
            client_id: r.get_u32(),
            ticker_id: r.get_u32(),
            client_order_id: r.get_u64(),
            market_order_id: r.get_u64(),
            side: Side::from_u8(r.get_u8())?,
            price: r.get_i64(),
            exec_qty: r.get_u32(),
            leaves_qty: r.get_u32(),
        })
    }
}

/// Book or trade event, exchange → world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MarketUpdateKind {
    #[default]
    Invalid = 0,
    Add = 1,
    Modify = 2,
    Cancel = 3,
    Trade = 4,
    Clear = 5,
    SnapshotStart = 6,
    SnapshotEnd = 7,
}

impl MarketUpdateKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Add),
            2 => Some(Self::Modify),
            3 => Some(Self::Cancel),
            4 => Some(Self::Trade),
            5 => Some(Self::Clear),
            6 => Some(Self::SnapshotStart),
            7 => Some(Self::SnapshotEnd),
            _ => None,
        }
    }
}

/// Public market-data event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: MarketUpdateKind,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        Self {
            kind: MarketUpdateKind::Invalid,
            order_id: ORDER_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }
}

impl fmt::Display for MarketUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarketUpdate[{:?} ticker:{} oid:{} {} {}@{} prio:{}]",
            self.kind, self.ticker_id, self.order_id, self.side, self.qty, self.price,
            self.priority
        )
    }
}

impl MarketUpdate {
    /// Wire size of one encoded update.
    pub const ENCODED_LEN: usize = 34;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        let mut w = Writer::new(&mut buf);
        w.put_u8(self.kind as u8);
        w.put_u64(self.order_id);
        w.put_u32(self.ticker_id);
        w.put_u8(self.side.to_u8());
        w.put_i64(self.price);
        w.put_u32(self.qty);
        w.put_u64(self.priority);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut r = Reader::new(buf, Self::ENCODED_LEN)?;
        Some(Self {
            kind: MarketUpdateKind::from_u8(r.get_u8())?,
            order_id: r.get_u64(),
            ticker_id: r.get_u32(),
            side: Side::from_u8(r.get_u8())?,
            price: r.get_i64(),
            qty: r.get_u32(),
            priority: r.get_u64(),
        })
    }
}

/// Sequenced order-entry frame carried over TCP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqClientRequest {
    pub seq: u64,
    pub request: ClientRequest,
}

impl SeqClientRequest {
    pub const ENCODED_LEN: usize = 8 + ClientRequest::ENCODED_LEN;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..].copy_from_slice(&self.request.encode());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let seq = u64::from_le_bytes(buf[..8].try_into().ok()?);
        let request = ClientRequest::decode(&buf[8..Self::ENCODED_LEN])?;
        Some(Self { seq, request })
    }
}

/// Sequenced order-outcome frame carried over TCP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqClientResponse {
    pub seq: u64,
    pub response: ClientResponse,
}

impl SeqClientResponse {
    pub const ENCODED_LEN: usize = 8 + ClientResponse::ENCODED_LEN;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..].copy_from_slice(&self.response.encode());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let seq = u64::from_le_bytes(buf[..8].try_into().ok()?);
        let response = ClientResponse::decode(&buf[8..Self::ENCODED_LEN])?;
        Some(Self { seq, response })
    }
}

/// Sequenced market-data datagram carried over UDP multicast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqMarketUpdate {
    pub seq: u64,
    pub update: MarketUpdate,
}

impl SeqMarketUpdate {
    pub const ENCODED_LEN: usize = 8 + MarketUpdate::ENCODED_LEN;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..].copy_from_slice(&self.update.encode());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let seq = u64::from_le_bytes(buf[..8].try_into().ok()?);
        let update = MarketUpdate::decode(&buf[8..Self::ENCODED_LEN])?;
        Some(Self { seq, update })
    }
}

// Little-endian field packing helpers. Offsets are tracked by the cursor so
// the per-message codecs stay declarative.

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_u8(&mut self, value: u8) {
        self.buf[self.pos] = value;
        self.pos += 1;
    }

    fn put_u32(&mut self, value: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&value.to_le_bytes());
        self.pos += 4;
    }

    fn put_u64(&mut self, value: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&value.to_le_bytes());
        self.pos += 8;
    }

    fn put_i64(&mut self, value: i64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&value.to_le_bytes());
        self.pos += 8;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], expected: usize) -> Option<Self> {
        if buf.len() < expected {
            return None;
        }
        Some(Self { buf, pos: 0 })
    }

    fn get_u8(&mut self) -> u8 {
        let value = self.buf[self.pos];
        self.pos += 1;
        value
    }

    fn get_u32(&mut self) -> u32 {
        let value = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        value
    }

    fn get_u64(&mut self) -> u64 {
        let value = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        value
    }

    fn get_i64(&mut self) -> i64 {
        let value = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = ClientRequest {
            kind: ClientRequestKind::New,
            client_id: 7,
            ticker_id: 3,
            order_id: 42,
            side: Side::Buy,
            price: 101,
            qty: 50,
        };
        let decoded = ClientRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = ClientResponse {
            kind: ClientResponseKind::Filled,
            client_id: 7,
            ticker_id: 3,
            client_order_id: 42,
            market_order_id: 9001,
            side: Side::Sell,
            price: -5,
            exec_qty: 10,
            leaves_qty: 40,
        };
        let decoded = ClientResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_sequenced_update_roundtrip() {
        let framed = SeqMarketUpdate {
            seq: 12345,
            update: MarketUpdate {
                kind: MarketUpdateKind::Trade,
                order_id: 1,
                ticker_id: 0,
                side: Side::Buy,
                price: 99,
                qty: 5,
                priority: 17,
            },
        };
        let decoded = SeqMarketUpdate::decode(&framed.encode()).unwrap();
        assert_eq!(decoded, framed);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut buf = ClientRequest::default().encode();
        buf[0] = 0xFF;
        assert!(ClientRequest::decode(&buf).is_none());
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let buf = [0u8; 4];
        assert!(MarketUpdate::decode(&buf).is_none());
        assert!(SeqClientRequest::decode(&buf).is_none());
    }
}
