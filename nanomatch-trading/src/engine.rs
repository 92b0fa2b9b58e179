//! Trade engine
//!
//! The client's decision stage: consumes responses from the gateway and
//! market updates from the consumer, runs the configured algo, applies
//! pre-trade risk checks, and produces requests toward the gateway. Every
//! outgoing order is timed - the timestamp is taken when the triggering
//! event is picked off its ring and recorded once the request is on the
//! requests ring - and fed to the shared latency histogram.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam::utils::Backoff;

use nanomatch_core::core::messages::{
    ClientRequest, ClientResponse, ClientResponseKind, MarketUpdate,
};
use nanomatch_core::core::types::ClientId;
use nanomatch_core::perf::latency::LatencyHistogram;
use nanomatch_core::perf::spsc::{Consumer, Producer};
use nanomatch_core::perf::{cpu, timer};

use crate::algo::{AlgoAction, AlgoType, MakerAlgo, RandomAlgo, RiskState, TickerCfg};

/// Trade engine identity, algo selection, and placement.
#[derive(Debug, Clone)]
pub struct TradeEngineConfig {
    pub client_id: ClientId,
    pub algo_type: AlgoType,
    pub ticker_cfgs: Vec<TickerCfg>,
    /// For the Random algo: stop after this many sent orders (0 = run
    /// until shutdown).
    pub max_random_orders: u64,
    pub core: Option<usize>,
}

/// The decision-making pipeline stage.
pub struct TradeEngine {
    inner: Option<EngineLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TradeEngine {
    pub fn new(
        config: TradeEngineConfig,
        requests: Producer<ClientRequest>,
        responses: Consumer<ClientResponse>,
        updates: Consumer<MarketUpdate>,
        histogram: Arc<LatencyHistogram>,
    ) -> Self {
        let num_tickers = config.ticker_cfgs.len().max(1);
        let algo = match config.algo_type {
            AlgoType::Random => Algo::Random(RandomAlgo::new(config.client_id, num_tickers)),
            AlgoType::Maker => Algo::Maker(MakerAlgo::new(config.client_id, num_tickers)),
        };

        Self {
            inner: Some(EngineLoop {
                algo,
                ticker_cfgs: config.ticker_cfgs,
                risk: vec![RiskState::default(); num_tickers],
                requests,
                responses,
                updates,
                histogram,
                orders_sent: 0,
                orders_blocked: 0,
                max_random_orders: config.max_random_orders,
                core: config.core,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(engine_loop) = self.inner.take() else {
            bail!("trade engine already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("trade-engine".into())
            .spawn(move || engine_loop.run(&running))
            .context("failed to spawn trade-engine thread")?;
        self.thread = Some(handle);
        tracing::info!("trade engine started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("trade engine stopped");
    }
}

impl Drop for TradeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Algo {
    Random(RandomAlgo),
    Maker(MakerAlgo),
}

struct EngineLoop {
    algo: Algo,
    ticker_cfgs: Vec<TickerCfg>,
    risk: Vec<RiskState>,
    requests: Producer<ClientRequest>,
    responses: Consumer<ClientResponse>,
    updates: Consumer<MarketUpdate>,
    histogram: Arc<LatencyHistogram>,
    orders_sent: u64,
    orders_blocked: u64,
    max_random_orders: u64,
    core: Option<usize>,
}

impl EngineLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("trade-engine", self.core);

        let backoff = Backoff::new();
        while running.load(Ordering::Acquire) {
            let mut activity = false;
            activity |= self.drain_responses();
            activity |= self.drain_updates();
            activity |= self.drive_random();

            if activity {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }

        // Absorb what the exchange already answered so fills are accounted.
        self.drain_responses();
        tracing::info!(
            orders_sent = self.orders_sent,
            orders_blocked = self.orders_blocked,
            latency = %self.histogram.summary(),
            "trade engine exiting"
        );
    }

    fn drain_responses(&mut self) -> bool {
        let mut handled = false;
        while let Some(response) = self.responses.pop() {
            handled = true;
            if response.kind == ClientResponseKind::Filled {
                let ticker = response.ticker_id as usize;
                if let Some(state) = self.risk.get_mut(ticker) {
                    state.on_fill(response.side, response.price, response.exec_qty);
                }
            }
            tracing::trace!(%response, "response");
        }
        handled
    }

    fn drain_updates(&mut self) -> bool {
        let mut handled = false;
        while let Some(update) = self.updates.pop() {
            handled = true;
            let start_ns = timer::now_ns();

            if let Algo::Maker(maker) = &mut self.algo {
                let ticker = update.ticker_id as usize;
                let cfg = self
                    .ticker_cfgs
                    .get(ticker)
                    .copied()
                    .unwrap_or_default();
                for request in maker.on_market_update(&update, &cfg) {
                    Self::submit(
                        &mut self.requests,
                        &mut self.risk,
                        &self.ticker_cfgs,
                        &mut self.orders_sent,
                        &mut self.orders_blocked,
                        request,
                    );
                }
                // Tick-to-trade: event picked up to orders on the ring.
                self.histogram
                    .record(timer::now_ns().saturating_sub(start_ns));
            }
        }
        handled
    }

    /// The Random algo is self-paced rather than event-driven.
    fn drive_random(&mut self) -> bool {
        if self.max_random_orders > 0 && self.orders_sent >= self.max_random_orders {
            return false;
        }
        let Algo::Random(random) = &mut self.algo else {
            return false;
        };

        let start_ns = timer::now_ns();
        match random.next_action() {
            AlgoAction::Send(request) => {
                let sent = Self::submit(
                    &mut self.requests,
                    &mut self.risk,
                    &self.ticker_cfgs,
                    &mut self.orders_sent,
                    &mut self.orders_blocked,
                    request,
                );
                self.histogram
                    .record(timer::now_ns().saturating_sub(start_ns));
                sent
            }
            AlgoAction::None => false,
        }
    }

    /// Risk-check and enqueue one request. Free function over the fields to
    /// keep the borrows disjoint from the algo.
    fn submit(
        requests: &mut Producer<ClientRequest>,
        risk: &mut [RiskState],
        ticker_cfgs: &[TickerCfg],
        orders_sent: &mut u64,
        orders_blocked: &mut u64,
        request: ClientRequest,
    ) -> bool {
        use nanomatch_core::core::messages::ClientRequestKind;

        if request.kind == ClientRequestKind::New {
            let ticker = request.ticker_id as usize;
            let cfg = ticker_cfgs.get(ticker).copied().unwrap_or_default();
            let state = risk.get(ticker).copied().unwrap_or_default();
            if !state.allows(&cfg.risk, request.side, request.qty) {
                *orders_blocked += 1;
                tracing::debug!(%request, "blocked by pre-trade risk");
                return false;
            }
        }

        if requests.push(request) {
            *orders_sent += 1;
            true
        } else {
            tracing::warn!("client-requests ring full, dropping order");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::RiskCfg;
    use nanomatch_core::core::messages::{ClientRequestKind, MarketUpdateKind};
    use nanomatch_core::core::types::Side;
    use nanomatch_core::perf::spsc;
    use std::time::{Duration, Instant};

    fn engine_config(algo_type: AlgoType) -> TradeEngineConfig {
        TradeEngineConfig {
            client_id: 3,
            algo_type,
            ticker_cfgs: vec![TickerCfg {
                clip: 5,
                threshold: 0.5,
                risk: RiskCfg {
                    max_order_size: 200,
                    max_position: 10_000,
                    max_loss: 1e12,
                },
            }],
            max_random_orders: 50,
            core: None,
        }
    }

    fn drain_until<T: Clone + Default>(
        rx: &mut spsc::Consumer<T>,
        at_least: usize,
    ) -> Vec<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < at_least && Instant::now() < deadline {
            match rx.pop() {
                Some(value) => out.push(value),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        out
    }

    #[test]
    fn test_random_engine_emits_bounded_flow() {
        let (req_tx, mut req_rx) = spsc::ring::<ClientRequest>(256);
        let (_resp_tx, resp_rx) = spsc::ring::<ClientResponse>(256);
        let (_upd_tx, upd_rx) = spsc::ring::<MarketUpdate>(256);
        let histogram = Arc::new(LatencyHistogram::new());

        let mut engine = TradeEngine::new(
            engine_config(AlgoType::Random),
            req_tx,
            resp_rx,
            upd_rx,
            Arc::clone(&histogram),
        );
        engine.start().unwrap();

        let requests = drain_until(&mut req_rx, 50);
        engine.stop();

        assert_eq!(requests.len(), 50);
        assert!(requests.iter().all(|r| r.client_id == 3));
        assert!(requests
            .iter()
            .any(|r| r.kind == ClientRequestKind::New));
        // Latency was recorded for the sent orders.
        assert!(histogram.total_ops() >= 50);
    }

    #[test]
    fn test_maker_engine_quotes_on_trades() {
        let (req_tx, mut req_rx) = spsc::ring::<ClientRequest>(256);
        let (_resp_tx, resp_rx) = spsc::ring::<ClientResponse>(256);
        let (mut upd_tx, upd_rx) = spsc::ring::<MarketUpdate>(256);
        let histogram = Arc::new(LatencyHistogram::new());

        let mut engine = TradeEngine::new(
            engine_config(AlgoType::Maker),
            req_tx,
            resp_rx,
            upd_rx,
            Arc::clone(&histogram),
        );
        engine.start().unwrap();

        assert!(upd_tx.push(MarketUpdate {
            kind: MarketUpdateKind::Trade,
            order_id: 1,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 1,
            priority: 0,
        }));

        let requests = drain_until(&mut req_rx, 2);
        engine.stop();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].side, Side::Buy);
        assert_eq!(requests[0].price, 99);
        assert_eq!(requests[0].qty, 5);
        assert_eq!(requests[1].side, Side::Sell);
        assert_eq!(requests[1].price, 101);
        assert_eq!(histogram.total_ops(), 1);
    }

    #[test]
    fn test_fills_feed_pre_trade_risk() {
        let (req_tx, mut req_rx) = spsc::ring::<ClientRequest>(64);
        let (mut resp_tx, resp_rx) = spsc::ring::<ClientResponse>(64);
        let (mut upd_tx, upd_rx) = spsc::ring::<MarketUpdate>(64);

        // Position cap exactly at the fill size: after the fill, another
        // buy must be blocked while a sell is still allowed.
        let mut config = engine_config(AlgoType::Maker);
        config.ticker_cfgs[0].risk.max_position = 10;
        let mut engine = TradeEngine::new(
            config,
            req_tx,
            resp_rx,
            upd_rx,
            Arc::new(LatencyHistogram::new()),
        );
        engine.start().unwrap();

        assert!(resp_tx.push(ClientResponse {
            kind: ClientResponseKind::Filled,
            client_id: 3,
            ticker_id: 0,
            client_order_id: 1,
            market_order_id: 2,
            side: Side::Buy,
            price: 100,
            exec_qty: 10,
            leaves_qty: 0,
        }));
        // Let the fill land before the quote trigger.
        thread::sleep(Duration::from_millis(50));

        assert!(upd_tx.push(MarketUpdate {
            kind: MarketUpdateKind::Trade,
            order_id: 1,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 1,
            priority: 0,
        }));

        let requests = drain_until(&mut req_rx, 1);
        engine.stop();

        // Only the sell quote clears risk; the buy side is at the cap.
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].side, Side::Sell);
        assert_eq!(req_rx.pop(), None);
    }
}
