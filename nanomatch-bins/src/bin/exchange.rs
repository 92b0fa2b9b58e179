//! Exchange binary
//!
//! Wires the three exchange stages - order server, matching engine, market
//! data publisher - through the three SPSC rings, starts the performance
//! dashboard over the shared latency histogram, and runs until SIGINT or
//! SIGTERM. Teardown is cooperative: publisher, then matcher, then order
//! server, so the responses the matcher emits while draining still reach
//! the client sockets through the server's final flush.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use nanomatch_bins::common::{init_logging, wait_for_shutdown};
use nanomatch_core::config::constants::{
    ME_MAX_CLIENT_UPDATES, ME_MAX_MARKET_UPDATES, ORDER_GW_ADDR,
};
use nanomatch_core::perf::dashboard::PerfDashboard;
use nanomatch_core::perf::latency::LatencyHistogram;
use nanomatch_core::perf::{spsc, timer};
use nanomatch_core::resilience::KillSwitch;
use nanomatch_exchange::market_data::PublisherConfig;
use nanomatch_exchange::matcher::{MatcherConfig, MatchingEngine};
use nanomatch_exchange::{MarketDataPublisher, OrderServer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Nanomatch exchange")]
struct Args {
    /// TCP address the order server listens on
    #[arg(long, default_value = ORDER_GW_ADDR)]
    order_addr: String,

    /// CPU core for the matching engine thread
    #[arg(long)]
    matcher_core: Option<usize>,

    /// CPU core for the order server thread
    #[arg(long)]
    server_core: Option<usize>,

    /// CPU core for the market data publisher thread
    #[arg(long)]
    publisher_core: Option<usize>,

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

    tracing::info!("=== Nanomatch Exchange ===");

    // Pay the calibration sleep up front, not on the first hot-path call.
    timer::calibrate();

    let kill_switch = KillSwitch::install()?;

    let histogram = Arc::new(LatencyHistogram::new());
    let dashboard = PerfDashboard::new(Arc::clone(&histogram));
    dashboard.start()?;

    // The three rings; each has exactly one producer and one consumer stage.
    let (req_tx, req_rx) = spsc::ring(ME_MAX_CLIENT_UPDATES);
    let (resp_tx, resp_rx) = spsc::ring(ME_MAX_CLIENT_UPDATES);
    let (upd_tx, upd_rx) = spsc::ring(ME_MAX_MARKET_UPDATES);

    let mut matcher = MatchingEngine::new(
        MatcherConfig {
            core: args.matcher_core,
            ..MatcherConfig::default()
        },
        req_rx,
        resp_tx,
        upd_tx,
        Arc::clone(&histogram),
        dashboard.trade_counter(),
    );
    matcher.start()?;

    let mut publisher = MarketDataPublisher::new(
        PublisherConfig {
            core: args.publisher_core,
            ..PublisherConfig::default()
        },
        upd_rx,
    )?;
    publisher.start()?;

    let mut server = OrderServer::new(&args.order_addr, req_tx, resp_rx, args.server_core)?;
    server.start()?;

    tracing::info!("exchange started; Ctrl-C to stop");
    wait_for_shutdown(&kill_switch);

    // Teardown runs downstream-first: the publisher drains its updates,
    // the matcher drains its requests, and the order server - the
    // terminal consumer of responses - goes down last so its exit drain
    // ships everything the matcher produced while stopping.
    publisher.stop();
    matcher.stop();
    server.stop();
    dashboard.stop();

    tracing::info!(latency = %histogram.summary(), "exchange shut down cleanly");
    Ok(())
}
