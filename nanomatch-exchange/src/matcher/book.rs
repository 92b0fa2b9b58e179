//! Price-time priority limit order book
//!
//! One book per ticker. Price levels are FIFO queues of order keys; the
//! orders themselves live in slots of a shared [`MemPool`], so adding and
//! removing resting orders allocates nothing once the level maps are warm.
//!
//! An incoming order first trades against the opposite side while prices
//! cross - aggressors fill at the passive price, passives fill in arrival
//! order - and any remainder rests. Outcomes are reported through two
//! callbacks: `respond` for the owning clients, `publish` for the market.

use std::collections::{BTreeMap, HashMap, VecDeque};

use nanomatch_core::core::messages::{
    ClientRequest, ClientResponse, ClientResponseKind, MarketUpdate, MarketUpdateKind,
};
use nanomatch_core::core::types::{
    ClientId, OrderId, Price, Priority, Qty, Side, TickerId, CLIENT_ID_INVALID, ORDER_ID_INVALID,
    PRICE_INVALID, PRIORITY_INVALID, TICKER_ID_INVALID,
};
use nanomatch_core::perf::pools::{MemPool, PoolHandle};

/// A resting order as stored in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookOrder {
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub leaves_qty: Qty,
    pub priority: Priority,
}

impl Default for BookOrder {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: ORDER_ID_INVALID,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            leaves_qty: 0,
            priority: PRIORITY_INVALID,
        }
    }
}

/// (owning client, client order id) - unique per live order.
type OrderKey = (ClientId, OrderId);

/// Single-ticker price-time priority book.
pub struct OrderBook {
    ticker_id: TickerId,
    bids: BTreeMap<Price, VecDeque<OrderKey>>,
    asks: BTreeMap<Price, VecDeque<OrderKey>>,
    orders: HashMap<OrderKey, PoolHandle<BookOrder>>,
    next_market_order_id: OrderId,
    next_priority: Priority,
}

impl OrderBook {
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::with_capacity(1024),
            next_market_order_id: 1,
            next_priority: 1,
        }
    }

    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Live resting orders in this book.
    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    /// Best bid as (price, aggregate front-level quantity).
    pub fn best_bid(&self) -> Option<(Price, Qty)> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, level)| (*price, self.level_qty(level)))
    }

    /// Best ask as (price, aggregate front-level quantity).
    pub fn best_ask(&self) -> Option<(Price, Qty)> {
        self.asks
            .iter()
            .next()
            .map(|(price, level)| (*price, self.level_qty(level)))
    }

    fn level_qty(&self, level: &VecDeque<OrderKey>) -> Qty {
        level
            .iter()
            .filter_map(|key| self.orders.get(key).map(|order| order.leaves_qty))
            .sum()
    }

    /// Handle a NEW order: accept, match while crossing, rest the remainder.
    ///
    /// If the order pool is exhausted the unmatched remainder is rejected
    /// with an `Invalid` response rather than silently dropped.
    pub fn add(
        &mut self,
        pool: &MemPool<BookOrder>,
        request: &ClientRequest,
        respond: &mut impl FnMut(ClientResponse),
        publish: &mut impl FnMut(MarketUpdate),
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        respond(ClientResponse {
            kind: ClientResponseKind::Accepted,
            client_id: request.client_id,
            ticker_id: self.ticker_id,
            client_order_id: request.order_id,
            market_order_id,
            side: request.side,
            price: request.price,
            exec_qty: 0,
            leaves_qty: request.qty,
        });

        let mut leaves = request.qty;
        while leaves > 0 {
            let Some(passive_price) = self.best_opposite_price(request.side) else {
                break;
            };
            let crosses = match request.side {
                Side::Buy => passive_price <= request.price,
                Side::Sell => passive_price >= request.price,
                Side::Invalid => false,
            };
            if !crosses {
                break;
            }

            let passive_key = {
                let level = self
                    .opposite_levels_mut(request.side)
                    .get_mut(&passive_price)
                    .expect("best price level exists");
                *level.front().expect("price levels are never empty")
            };

            // Fill the front passive order and copy out what the reports need.
            let (fill, passive_done, passive) = {
                let passive = self
                    .orders
                    .get_mut(&passive_key)
                    .expect("level keys are always backed by live orders");
                let fill = leaves.min(passive.leaves_qty);
                passive.leaves_qty -= fill;
                leaves -= fill;
                (fill, passive.leaves_qty == 0, **passive)
            };

            respond(ClientResponse {
                kind: ClientResponseKind::Filled,
                client_id: request.client_id,
                ticker_id: self.ticker_id,
                client_order_id: request.order_id,
                market_order_id,
                side: request.side,
                price: passive_price,
                exec_qty: fill,
                leaves_qty: leaves,
            });
            respond(ClientResponse {
                kind: ClientResponseKind::Filled,
                client_id: passive.client_id,
                ticker_id: self.ticker_id,
                client_order_id: passive.client_order_id,
                market_order_id: passive.market_order_id,
                side: passive.side,
                price: passive_price,
                exec_qty: fill,
                leaves_qty: passive.leaves_qty,
            });
            publish(MarketUpdate {
                kind: MarketUpdateKind::Trade,
                order_id: market_order_id,
                ticker_id: self.ticker_id,
                side: request.side,
                price: passive_price,
                qty: fill,
                priority: PRIORITY_INVALID,
            });

            if passive_done {
                publish(MarketUpdate {
                    kind: MarketUpdateKind::Cancel,
                    order_id: passive.market_order_id,
                    ticker_id: self.ticker_id,
                    side: passive.side,
                    price: passive_price,
                    qty: 0,
                    priority: passive.priority,
                });
                let remove_level = {
                    let level = self
                        .opposite_levels_mut(request.side)
                        .get_mut(&passive_price)
                        .expect("level still present");
                    level.pop_front();
                    level.is_empty()
                };
                if remove_level {
                    self.opposite_levels_mut(request.side).remove(&passive_price);
                }
                self.orders.remove(&passive_key);
            } else {
                publish(MarketUpdate {
                    kind: MarketUpdateKind::Modify,
                    order_id: passive.market_order_id,
                    ticker_id: self.ticker_id,
                    side: passive.side,
                    price: passive_price,
                    qty: passive.leaves_qty,
                    priority: passive.priority,
                });
            }
        }

        if leaves == 0 {
            return;
        }

        // Rest the remainder.
        let priority = self.next_priority;
        self.next_priority += 1;
        let key: OrderKey = (request.client_id, request.order_id);
        let resting = BookOrder {
            client_id: request.client_id,
            ticker_id: self.ticker_id,
            client_order_id: request.order_id,
            market_order_id,
            side: request.side,
            price: request.price,
            leaves_qty: leaves,
            priority,
        };

        match pool.acquire(resting) {
            Some(handle) => {
                self.levels_mut(request.side)
                    .entry(request.price)
                    .or_default()
                    .push_back(key);
                self.orders.insert(key, handle);
                publish(MarketUpdate {
                    kind: MarketUpdateKind::Add,
                    order_id: market_order_id,
                    ticker_id: self.ticker_id,
                    side: request.side,
                    price: request.price,
                    qty: leaves,
                    priority,
                });
            }
            None => {
                tracing::warn!(
                    ticker = self.ticker_id,
                    client = request.client_id,
                    "order pool exhausted, rejecting remainder"
                );
                respond(ClientResponse {
                    kind: ClientResponseKind::Invalid,
                    client_id: request.client_id,
                    ticker_id: self.ticker_id,
                    client_order_id: request.order_id,
                    market_order_id,
                    side: request.side,
                    price: request.price,
                    exec_qty: 0,
                    leaves_qty: leaves,
                });
            }
        }
    }

    /// Handle a CANCEL: remove the order if the requesting client owns it.
    pub fn cancel(
        &mut self,
        request: &ClientRequest,
        respond: &mut impl FnMut(ClientResponse),
        publish: &mut impl FnMut(MarketUpdate),
    ) {
        let key: OrderKey = (request.client_id, request.order_id);
        match self.orders.remove(&key) {
            Some(handle) => {
                let order = *handle;
                let levels = self.levels_mut(order.side);
                if let Some(level) = levels.get_mut(&order.price) {
                    level.retain(|candidate| *candidate != key);
                    if level.is_empty() {
                        levels.remove(&order.price);
                    }
                }

                respond(ClientResponse {
                    kind: ClientResponseKind::Canceled,
                    client_id: request.client_id,
                    ticker_id: self.ticker_id,
                    client_order_id: request.order_id,
                    market_order_id: order.market_order_id,
                    side: order.side,
                    price: order.price,
                    exec_qty: 0,
                    leaves_qty: order.leaves_qty,
                });
                publish(MarketUpdate {
                    kind: MarketUpdateKind::Cancel,
                    order_id: order.market_order_id,
                    ticker_id: self.ticker_id,
                    side: order.side,
                    price: order.price,
                    qty: 0,
                    priority: order.priority,
                });
                // Dropping the handle returns the slot to the pool.
            }
            None => {
                respond(ClientResponse {
                    kind: ClientResponseKind::CancelRejected,
                    client_id: request.client_id,
                    ticker_id: self.ticker_id,
                    client_order_id: request.order_id,
                    market_order_id: ORDER_ID_INVALID,
                    side: request.side,
                    price: request.price,
                    exec_qty: 0,
                    leaves_qty: 0,
                });
            }
        }
    }

    fn best_opposite_price(&self, aggressor: Side) -> Option<Price> {
        match aggressor {
            Side::Buy => self.asks.keys().next().copied(),
            Side::Sell => self.bids.keys().next_back().copied(),
            Side::Invalid => None,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, VecDeque<OrderKey>> {
        match side {
            Side::Sell => &mut self.asks,
            _ => &mut self.bids,
        }
    }

    fn opposite_levels_mut(&mut self, aggressor: Side) -> &mut BTreeMap<Price, VecDeque<OrderKey>> {
        match aggressor {
            Side::Buy => &mut self.asks,
            _ => &mut self.bids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanomatch_core::core::messages::ClientRequestKind;

    fn new_request(
        client_id: ClientId,
        order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> ClientRequest {
        ClientRequest {
            kind: ClientRequestKind::New,
            client_id,
            ticker_id: 0,
            order_id,
            side,
            price,
            qty,
        }
    }

    fn drive(
        book: &mut OrderBook,
        pool: &MemPool<BookOrder>,
        request: ClientRequest,
    ) -> (Vec<ClientResponse>, Vec<MarketUpdate>) {
        let mut responses = Vec::new();
        let mut updates = Vec::new();
        match request.kind {
            ClientRequestKind::New => book.add(
                pool,
                &request,
                &mut |resp| responses.push(resp),
                &mut |update| updates.push(update),
            ),
            ClientRequestKind::Cancel => book.cancel(
                &request,
                &mut |resp| responses.push(resp),
                &mut |update| updates.push(update),
            ),
            ClientRequestKind::Invalid => {}
        }
        (responses, updates)
    }

    #[test]
    fn test_resting_order_accepted_and_published() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        let (responses, updates) = drive(&mut book, &pool, new_request(1, 100, Side::Buy, 50, 10));

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].kind, ClientResponseKind::Accepted);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, MarketUpdateKind::Add);
        assert_eq!(updates[0].qty, 10);
        assert_eq!(book.best_bid(), Some((50, 10)));
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_crossing_orders_trade_at_passive_price() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        drive(&mut book, &pool, new_request(1, 100, Side::Sell, 50, 10));
        // Aggressive buy at 55 hits the resting 50 ask: trades at 50.
        let (responses, updates) = drive(&mut book, &pool, new_request(2, 200, Side::Buy, 55, 10));

        let kinds: Vec<_> = responses.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ClientResponseKind::Accepted,
                ClientResponseKind::Filled,
                ClientResponseKind::Filled,
            ]
        );
        // Aggressor fill reported first, at the passive price.
        assert_eq!(responses[1].client_id, 2);
        assert_eq!(responses[1].price, 50);
        assert_eq!(responses[1].exec_qty, 10);
        assert_eq!(responses[2].client_id, 1);

        let update_kinds: Vec<_> = updates.iter().map(|u| u.kind).collect();
        assert_eq!(
            update_kinds,
            vec![MarketUpdateKind::Trade, MarketUpdateKind::Cancel]
        );
        assert_eq!(updates[0].price, 50);
        assert_eq!(updates[0].qty, 10);

        // Book is flat and the pool slot came back.
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.best_bid(), None);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_partial_fill_rests_remainder() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        drive(&mut book, &pool, new_request(1, 100, Side::Sell, 50, 4));
        let (responses, updates) = drive(&mut book, &pool, new_request(2, 200, Side::Buy, 50, 10));

        // Aggressor takes 4, rests 6.
        assert_eq!(responses[1].exec_qty, 4);
        assert_eq!(responses[1].leaves_qty, 6);
        assert_eq!(updates.last().unwrap().kind, MarketUpdateKind::Add);
        assert_eq!(updates.last().unwrap().qty, 6);
        assert_eq!(book.best_bid(), Some((50, 6)));
    }

    #[test]
    fn test_price_time_priority() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        // Two asks at the same price; the earlier one must fill first.
        drive(&mut book, &pool, new_request(1, 100, Side::Sell, 50, 5));
        drive(&mut book, &pool, new_request(3, 300, Side::Sell, 50, 5));
        let (responses, _) = drive(&mut book, &pool, new_request(2, 200, Side::Buy, 50, 5));

        let passive_fill = responses
            .iter()
            .find(|r| r.client_id != 2 && r.kind == ClientResponseKind::Filled)
            .unwrap();
        assert_eq!(passive_fill.client_id, 1);
        assert_eq!(book.best_ask(), Some((50, 5)));
    }

    #[test]
    fn test_better_price_fills_first() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        drive(&mut book, &pool, new_request(1, 100, Side::Sell, 52, 5));
        drive(&mut book, &pool, new_request(1, 101, Side::Sell, 51, 5));
        let (responses, _) = drive(&mut book, &pool, new_request(2, 200, Side::Buy, 52, 7));

        // 5 at 51 first, then 2 at 52.
        let aggressor_fills: Vec<_> = responses
            .iter()
            .filter(|r| r.client_id == 2 && r.kind == ClientResponseKind::Filled)
            .collect();
        assert_eq!(aggressor_fills.len(), 2);
        assert_eq!(aggressor_fills[0].price, 51);
        assert_eq!(aggressor_fills[0].exec_qty, 5);
        assert_eq!(aggressor_fills[1].price, 52);
        assert_eq!(aggressor_fills[1].exec_qty, 2);
        assert_eq!(book.best_ask(), Some((52, 3)));
    }

    #[test]
    fn test_cancel_roundtrip() {
        let pool: MemPool<BookOrder> = MemPool::new(16);
        let mut book = OrderBook::new(0);

        drive(&mut book, &pool, new_request(1, 100, Side::Buy, 50, 10));

        let mut cancel = new_request(1, 100, Side::Buy, 50, 10);
        cancel.kind = ClientRequestKind::Cancel;
        let (responses, updates) = drive(&mut book, &pool, cancel);

        assert_eq!(responses[0].kind, ClientResponseKind::Canceled);
        assert_eq!(updates[0].kind, MarketUpdateKind::Cancel);
        assert_eq!(book.best_bid(), None);
        assert_eq!(pool.in_use(), 0);

        // Canceling again is rejected.
        let mut cancel_again = new_request(1, 100, Side::Buy, 50, 10);
        cancel_again.kind = ClientRequestKind::Cancel;
        let (responses, _) = drive(&mut book, &pool, cancel_again);
        assert_eq!(responses[0].kind, ClientResponseKind::CancelRejected);
    }

    #[test]
    fn test_pool_exhaustion_rejects_remainder() {
        let pool: MemPool<BookOrder> = MemPool::new(2);
        let mut book = OrderBook::new(0);

        drive(&mut book, &pool, new_request(1, 100, Side::Buy, 10, 1));
        drive(&mut book, &pool, new_request(1, 101, Side::Buy, 11, 1));
        let (responses, updates) = drive(&mut book, &pool, new_request(1, 102, Side::Buy, 12, 1));

        assert_eq!(responses[0].kind, ClientResponseKind::Accepted);
        assert_eq!(responses[1].kind, ClientResponseKind::Invalid);
        assert!(updates.is_empty());
        assert_eq!(book.open_orders(), 2);
    }
}
