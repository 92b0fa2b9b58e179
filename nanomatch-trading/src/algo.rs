//! Trading algos and per-ticker risk configuration
//!
//! Two algos ship with the client: `Random`, a stress generator that
//! sprays new orders and cancels around per-ticker base prices, and
//! `Maker`, which quotes both sides around the last observed trade. Both
//! run their outgoing flow through the same pre-trade [`RiskCfg`] checks.

use std::str::FromStr;

use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nanomatch_core::core::messages::{ClientRequest, ClientRequestKind, MarketUpdate, MarketUpdateKind};
use nanomatch_core::core::types::{ClientId, OrderId, Price, Qty, Side, TickerId};

/// Which algo the trade engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoType {
    Random,
    Maker,
}

impl FromStr for AlgoType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "RANDOM" => Ok(Self::Random),
            "MAKER" => Ok(Self::Maker),
            other => bail!("unknown algo type '{other}' (expected RANDOM or MAKER)"),
        }
    }
}

/// Pre-trade limits, enforced per ticker before any order leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCfg {
    pub max_order_size: Qty,
    pub max_position: i64,
    pub max_loss: f64,
}

impl Default for RiskCfg {
    fn default() -> Self {
        Self {
            max_order_size: 100,
            max_position: 1_000,
            max_loss: 1_000_000.0,
        }
    }
}

/// Per-ticker algo parameters: quote clip, signal threshold, risk limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerCfg {
    pub clip: Qty,
    pub threshold: f64,
    pub risk: RiskCfg,
}

impl Default for TickerCfg {
    fn default() -> Self {
        Self {
            clip: 10,
            threshold: 0.5,
            risk: RiskCfg::default(),
        }
    }
}

/// Running position and PnL per ticker, updated from fills.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskState {
    pub position: i64,
    pub cash: i64,
    pub last_trade_price: Price,
}

impl RiskState {
    pub fn on_fill(&mut self, side: Side, price: Price, qty: Qty) {
        let signed_qty = side.sign() * qty as i64;
        self.position += signed_qty;
        self.cash -= signed_qty * price;
        self.last_trade_price = price;
    }

    /// Mark-to-market loss against the last trade price; positive = losing.
    pub fn open_loss(&self) -> f64 {
        let equity = self.cash + self.position * self.last_trade_price;
        -(equity as f64)
    }

    /// Would this order violate the limits?
    pub fn allows(&self, cfg: &RiskCfg, side: Side, qty: Qty) -> bool {
        if qty > cfg.max_order_size {
            return false;
        }
        let projected = self.position + side.sign() * qty as i64;
        if projected.unsigned_abs() > cfg.max_position.unsigned_abs() {
            return false;
        }
        self.open_loss() <= cfg.max_loss
    }
}

/// What an algo wants to do in response to an event.
pub enum AlgoAction {
    None,
    Send(ClientRequest),
}

/// Random order-flow generator used for latency soak runs.
///
/// Deterministic per client id: each tick emits a new order at a price
/// near the ticker's base and, every other tick, a cancel of a previously
/// sent order.
pub struct RandomAlgo {
    client_id: ClientId,
    rng: StdRng,
    base_price: Vec<Price>,
    next_order_id: OrderId,
    open_order_ids: Vec<(TickerId, OrderId)>,
    cancel_toggle: bool,
}

impl RandomAlgo {
    pub fn new(client_id: ClientId, num_tickers: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(client_id as u64);
        let base_price = (0..num_tickers)
            .map(|_| 100 + rng.gen_range(0..100) as Price)
            .collect();

        Self {
            client_id,
            rng,
            base_price,
            next_order_id: client_id as OrderId * 1_000_000,
            open_order_ids: Vec::with_capacity(1024),
            cancel_toggle: false,
        }
    }

    /// Next order in the stream; alternates new orders and cancels.
    pub fn next_action(&mut self) -> AlgoAction {
        self.cancel_toggle = !self.cancel_toggle;

        if self.cancel_toggle || self.open_order_ids.is_empty() {
            let ticker_id = self.rng.gen_range(0..self.base_price.len()) as TickerId;
            let price = self.base_price[ticker_id as usize] + self.rng.gen_range(1..=10) as Price;
            let qty = 1 + self.rng.gen_range(1..=100) as Qty;
            let side = if self.rng.gen_bool(0.5) {
                Side::Buy
            } else {
                Side::Sell
            };
            let order_id = self.next_order_id;
            self.next_order_id += 1;
            self.open_order_ids.push((ticker_id, order_id));

            AlgoAction::Send(ClientRequest {
                kind: ClientRequestKind::New,
                client_id: self.client_id,
                ticker_id,
                order_id,
                side,
                price,
                qty,
            })
        } else {
            let victim = self.rng.gen_range(0..self.open_order_ids.len());
            let (ticker_id, order_id) = self.open_order_ids.swap_remove(victim);

            AlgoAction::Send(ClientRequest {
                kind: ClientRequestKind::Cancel,
                client_id: self.client_id,
                ticker_id,
                order_id,
                side: Side::Invalid,
                price: 0,
                qty: 0,
            })
        }
    }
}

/// Quote-both-sides market maker around the last trade price.
///
/// Keeps at most one live order per side per ticker; when the reference
/// price moves by more than the configured threshold, the stale quote is
/// canceled and replaced.
pub struct MakerAlgo {
    client_id: ClientId,
    next_order_id: OrderId,
    quotes: Vec<[Option<LiveQuote>; 2]>,
}

#[derive(Debug, Clone, Copy)]
struct LiveQuote {
    order_id: OrderId,
    price: Price,
}

impl MakerAlgo {
    pub fn new(client_id: ClientId, num_tickers: usize) -> Self {
        Self {
            client_id,
            next_order_id: client_id as OrderId * 1_000_000,
            quotes: vec![[None, None]; num_tickers],
        }
    }

    /// React to a market update; returns the orders to send.
    pub fn on_market_update(
        &mut self,
        update: &MarketUpdate,
        cfg: &TickerCfg,
    ) -> Vec<ClientRequest> {
        if update.kind != MarketUpdateKind::Trade {
            return Vec::new();
        }
        let ticker = update.ticker_id as usize;
        if ticker >= self.quotes.len() {
            return Vec::new();
        }

        let reference = update.price;
        let mut outgoing = Vec::with_capacity(4);

        for (slot, side, quote_price) in [
            (0usize, Side::Buy, reference - 1),
            (1usize, Side::Sell, reference + 1),
        ] {
            let stale = match self.quotes[ticker][slot] {
                Some(quote) => (quote.price - quote_price).unsigned_abs() as f64 > cfg.threshold,
                None => true,
            };
            if !stale {
                continue;
            }

            if let Some(quote) = self.quotes[ticker][slot].take() {
                outgoing.push(ClientRequest {
                    kind: ClientRequestKind::Cancel,
                    client_id: self.client_id,
                    ticker_id: update.ticker_id,
                    order_id: quote.order_id,
                    side,
                    price: quote.price,
                    qty: 0,
                });
            }

            let order_id = self.next_order_id;
            self.next_order_id += 1;
            self.quotes[ticker][slot] = Some(LiveQuote {
                order_id,
                price: quote_price,
            });
            outgoing.push(ClientRequest {
                kind: ClientRequestKind::New,
                client_id: self.client_id,
                ticker_id: update.ticker_id,
                order_id,
                side,
                price: quote_price,
                qty: cfg.clip,
            });
        }

        outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algo_type_parsing() {
        assert_eq!("random".parse::<AlgoType>().unwrap(), AlgoType::Random);
        assert_eq!("MAKER".parse::<AlgoType>().unwrap(), AlgoType::Maker);
        assert!("twap".parse::<AlgoType>().is_err());
    }

    #[test]
    fn test_risk_blocks_oversized_order() {
        let cfg = RiskCfg {
            max_order_size: 10,
            max_position: 100,
            max_loss: 1e9,
        };
        let state = RiskState::default();
        assert!(state.allows(&cfg, Side::Buy, 10));
        assert!(!state.allows(&cfg, Side::Buy, 11));
    }

    #[test]
    fn test_risk_blocks_position_breach() {
        let cfg = RiskCfg {
            max_order_size: 100,
            max_position: 50,
            max_loss: 1e9,
        };
        let mut state = RiskState::default();
        state.on_fill(Side::Buy, 100, 45);
        assert_eq!(state.position, 45);
        assert!(state.allows(&cfg, Side::Buy, 5));
        assert!(!state.allows(&cfg, Side::Buy, 6));
        // The short direction still has room.
        assert!(state.allows(&cfg, Side::Sell, 95));
    }

    #[test]
    fn test_fill_accounting() {
        let mut state = RiskState::default();
        state.on_fill(Side::Buy, 100, 10);
        state.on_fill(Side::Sell, 110, 10);
        assert_eq!(state.position, 0);
        // Bought at 100, sold at 110: 100 profit = -100 loss.
        assert_eq!(state.open_loss(), -100.0);
    }

    #[test]
    fn test_random_algo_deterministic_per_seed() {
        let mut a = RandomAlgo::new(5, 4);
        let mut b = RandomAlgo::new(5, 4);
        for _ in 0..100 {
            match (a.next_action(), b.next_action()) {
                (AlgoAction::Send(x), AlgoAction::Send(y)) => assert_eq!(x, y),
                _ => panic!("random algo always emits"),
            }
        }
    }

    #[test]
    fn test_random_algo_alternates_new_and_cancel() {
        let mut algo = RandomAlgo::new(1, 2);
        let mut news = 0;
        let mut cancels = 0;
        for _ in 0..100 {
            if let AlgoAction::Send(request) = algo.next_action() {
                match request.kind {
                    ClientRequestKind::New => news += 1,
                    ClientRequestKind::Cancel => cancels += 1,
                    ClientRequestKind::Invalid => panic!("never emits invalid"),
                }
            }
        }
        assert_eq!(news + cancels, 100);
        assert!(news >= 50);
        assert!(cancels >= 40);
    }

    #[test]
    fn test_maker_quotes_both_sides() {
        let mut maker = MakerAlgo::new(9, 1);
        let cfg = TickerCfg::default();
        let trade = MarketUpdate {
            kind: MarketUpdateKind::Trade,
            order_id: 1,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 1,
            priority: 0,
        };

        let orders = maker.on_market_update(&trade, &cfg);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[0].price, 99);
        assert_eq!(orders[1].side, Side::Sell);
        assert_eq!(orders[1].price, 101);

        // Same reference price: quotes are fresh, nothing to do.
        assert!(maker.on_market_update(&trade, &cfg).is_empty());

        // A big move cancels and replaces both sides.
        let mut moved = trade;
        moved.price = 110;
        let orders = maker.on_market_update(&moved, &cfg);
        assert_eq!(orders.len(), 4);
        assert_eq!(orders[0].kind, ClientRequestKind::Cancel);
        assert_eq!(orders[1].kind, ClientRequestKind::New);
        assert_eq!(orders[1].price, 109);
    }
}
