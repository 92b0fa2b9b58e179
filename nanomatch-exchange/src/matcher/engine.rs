//! Matching engine run loop
//!
//! Consumes the client-requests ring, routes each request to its ticker's
//! book, and pushes the resulting responses and market updates onto their
//! rings. One thread, optionally pinned; idles with spin-then-yield
//! back-off, never blocks.
//!
//! Every request is timed with the TSC timer and recorded into the shared
//! latency histogram; executed trades are counted toward the dashboard's
//! trades-per-second gauge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam::utils::Backoff;

use nanomatch_core::config::constants::{ME_MAX_POOLED_ORDERS, ME_MAX_TICKERS};
use nanomatch_core::core::messages::{
    ClientRequest, ClientRequestKind, ClientResponse, ClientResponseKind, MarketUpdate,
    MarketUpdateKind,
};
use nanomatch_core::core::types::ORDER_ID_INVALID;
use nanomatch_core::perf::dashboard::TradeCounter;
use nanomatch_core::perf::latency::LatencyHistogram;
use nanomatch_core::perf::pools::MemPool;
use nanomatch_core::perf::spsc::{Consumer, Producer};
use nanomatch_core::perf::{cpu, timer};

use crate::matcher::book::{BookOrder, OrderBook};

/// Matching engine sizing and placement.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Number of tickers to host (books are indexed by TickerId).
    pub num_tickers: usize,
    /// Capacity of the shared resting-order pool (power of two).
    pub pool_capacity: usize,
    /// Core to pin the engine thread to.
    pub core: Option<usize>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            num_tickers: ME_MAX_TICKERS,
            pool_capacity: ME_MAX_POOLED_ORDERS,
            core: None,
        }
    }
}

/// The matching engine pipeline stage.
pub struct MatchingEngine {
    inner: Option<EngineLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MatchingEngine {
    pub fn new(
        config: MatcherConfig,
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        updates: Producer<MarketUpdate>,
        histogram: Arc<LatencyHistogram>,
        trades: TradeCounter,
    ) -> Self {
        let books = (0..config.num_tickers)
            .map(|ticker| OrderBook::new(ticker as u32))
            .collect();

        Self {
            inner: Some(EngineLoop {
                requests,
                responses,
                updates,
                books,
                pool: MemPool::new(config.pool_capacity),
                histogram,
                trades,
                core: config.core,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Spawn the engine thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(engine_loop) = self.inner.take() else {
            bail!("matching engine already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("matcher".into())
            .spawn(move || engine_loop.run(&running))
            .context("failed to spawn matcher thread")?;
        self.thread = Some(handle);
        tracing::info!("matching engine started");
        Ok(())
    }

    /// Signal the engine to drain its ring and exit, then join it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("matching engine stopped");
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EngineLoop {
    requests: Consumer<ClientRequest>,
    responses: Producer<ClientResponse>,
    updates: Producer<MarketUpdate>,
    books: Vec<OrderBook>,
    pool: MemPool<BookOrder>,
    histogram: Arc<LatencyHistogram>,
    trades: TradeCounter,
    core: Option<usize>,
}

impl EngineLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("matcher", self.core);

        let backoff = Backoff::new();
        while running.load(Ordering::Acquire) {
            if self.drain_one() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }

        // Cooperative shutdown: the producer has stopped, drain what's left.
        let mut drained = 0u64;
        while self.drain_one() {
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(drained, "matcher drained remaining requests on shutdown");
        }
        tracing::info!(
            open_orders = self.books.iter().map(OrderBook::open_orders).sum::<usize>(),
            pool_in_use = self.pool.in_use(),
            "matcher exiting"
        );
    }

    /// Process at most one request. Returns false when the ring was empty.
    fn drain_one(&mut self) -> bool {
        let request = match self.requests.peek_read() {
            Some(request) => *request,
            None => return false,
        };
        self.requests.commit_read();

        let start_ns = timer::now_ns();
        self.process(&request);
        self.histogram
            .record(timer::now_ns().saturating_sub(start_ns));
        true
    }

    fn process(&mut self, request: &ClientRequest) {
        let ticker = request.ticker_id as usize;
        if ticker >= self.books.len() || request.kind == ClientRequestKind::Invalid {
            tracing::warn!(%request, "rejecting malformed request");
            let reject = ClientResponse {
                kind: ClientResponseKind::Invalid,
                client_id: request.client_id,
                ticker_id: request.ticker_id,
                client_order_id: request.order_id,
                market_order_id: ORDER_ID_INVALID,
                side: request.side,
                price: request.price,
                exec_qty: 0,
                leaves_qty: 0,
            };
            if !self.responses.push(reject) {
                tracing::warn!("client-responses ring full, dropping rejection");
            }
            return;
        }

        let responses = &mut self.responses;
        let updates = &mut self.updates;
        let trades = &self.trades;
        let book = &mut self.books[ticker];

        let mut respond = |response: ClientResponse| {
            if !responses.push(response) {
                tracing::warn!(%response, "client-responses ring full, dropping");
            }
        };
        let mut publish = |update: MarketUpdate| {
            if update.kind == MarketUpdateKind::Trade {
                trades.record_trade();
            }
            if !updates.push(update) {
                tracing::warn!(%update, "market-updates ring full, dropping");
            }
        };

        match request.kind {
            ClientRequestKind::New => book.add(&self.pool, request, &mut respond, &mut publish),
            ClientRequestKind::Cancel => book.cancel(request, &mut respond, &mut publish),
            ClientRequestKind::Invalid => unreachable!("rejected above"),
        }
    }
}
