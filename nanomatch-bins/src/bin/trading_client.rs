//! Trading client binary
//!
//! `trading_client CLIENT_ID ALGO_TYPE [CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS]...`
//!
//! Mirrors the exchange wiring on the client side: order gateway, market
//! data consumer, and trade engine threaded through three SPSC rings.
//! Exits 0 on a clean SIGINT/SIGTERM teardown; bad arguments or a dead
//! exchange endpoint exit non-zero before any thread starts.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use nanomatch_bins::common::{init_logging, parse_ticker_cfgs, wait_for_shutdown};
use nanomatch_core::config::constants::{
    INCREMENTAL_MCAST_IP, INCREMENTAL_MCAST_PORT, ME_MAX_CLIENT_UPDATES, ME_MAX_MARKET_UPDATES,
    ORDER_GW_ADDR, SNAPSHOT_MCAST_IP, SNAPSHOT_MCAST_PORT,
};
use nanomatch_core::perf::latency::LatencyHistogram;
use nanomatch_core::perf::{spsc, timer};
use nanomatch_core::resilience::KillSwitch;
use nanomatch_trading::algo::AlgoType;
use nanomatch_trading::consumer::ConsumerConfig;
use nanomatch_trading::engine::TradeEngineConfig;
use nanomatch_trading::{MarketDataConsumer, OrderGateway, TradeEngine};

#[derive(Parser, Debug)]
#[command(author, version, about = "Nanomatch trading client")]
struct Args {
    /// Client identifier, unique per connection to the exchange
    client_id: u32,

    /// Algo to run: RANDOM or MAKER
    algo_type: String,

    /// Per-ticker parameters: CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS,
    /// repeated once per ticker
    #[arg(num_args = 0..)]
    ticker_params: Vec<String>,

    /// Exchange order-entry address
    #[arg(long, default_value = ORDER_GW_ADDR)]
    exchange_addr: String,

    /// Stop the RANDOM algo after this many orders (0 = until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    max_orders: u64,

    /// CPU core for the trade engine thread
    #[arg(long)]
    engine_core: Option<usize>,

    /// CPU core for the order gateway thread
    #[arg(long)]
    gateway_core: Option<usize>,

    /// CPU core for the market data consumer thread
    #[arg(long)]
    consumer_core: Option<usize>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    let algo_type: AlgoType = args.algo_type.parse()?;
    let ticker_cfgs = parse_ticker_cfgs(&args.ticker_params)?;

    tracing::info!(
        client = args.client_id,
        algo = ?algo_type,
        tickers = ticker_cfgs.len(),
        "=== Nanomatch Trading Client ==="
    );

    timer::calibrate();
    let kill_switch = KillSwitch::install()?;
    let histogram = Arc::new(LatencyHistogram::new());

    let (req_tx, req_rx) = spsc::ring(ME_MAX_CLIENT_UPDATES);
    let (resp_tx, resp_rx) = spsc::ring(ME_MAX_CLIENT_UPDATES);
    let (upd_tx, upd_rx) = spsc::ring(ME_MAX_MARKET_UPDATES);

    let mut gateway = OrderGateway::new(
        args.client_id,
        &args.exchange_addr,
        req_rx,
        resp_tx,
        args.gateway_core,
    )?;

    let mut consumer = MarketDataConsumer::new(
        ConsumerConfig {
            snapshot_group: SNAPSHOT_MCAST_IP
                .parse::<Ipv4Addr>()
                .context("bad snapshot group")?,
            snapshot_port: SNAPSHOT_MCAST_PORT,
            incremental_group: INCREMENTAL_MCAST_IP
                .parse::<Ipv4Addr>()
                .context("bad incremental group")?,
            incremental_port: INCREMENTAL_MCAST_PORT,
            core: args.consumer_core,
        },
        upd_tx,
    )?;

    let mut engine = TradeEngine::new(
        TradeEngineConfig {
            client_id: args.client_id,
            algo_type,
            ticker_cfgs,
            max_random_orders: args.max_orders,
            core: args.engine_core,
        },
        req_tx,
        resp_rx,
        upd_rx,
        Arc::clone(&histogram),
    );

    gateway.start()?;
    consumer.start()?;
    engine.start()?;

    tracing::info!("trading client started; Ctrl-C to stop");
    wait_for_shutdown(&kill_switch);

    // Mirror of the exchange teardown: the consumer and gateway stop
    // producing first, and the trade engine - the terminal consumer of
    // responses and updates - goes down last so its exit drain accounts
    // every fill the gateway relayed.
    consumer.stop();
    gateway.stop();
    engine.stop();

    tracing::info!(latency = %histogram.summary(), "trading client shut down cleanly");
    Ok(())
}
