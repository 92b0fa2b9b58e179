//! Common utilities for the binaries
//!
//! Logging initialization, ticker-config parsing, and the shutdown wait
//! loop shared by the exchange and the trading client.

use std::time::Duration;

use anyhow::{bail, Result};

use nanomatch_core::resilience::KillSwitch;
use nanomatch_core::utils::init_logger;
use nanomatch_trading::algo::{RiskCfg, TickerCfg};

/// Initialize tracing for a binary.
pub fn init_logging(log_level: &str, json_logs: bool) {
    init_logger(log_level, json_logs);
}

/// Parse trailing per-ticker quintuples:
/// `CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS` per ticker.
pub fn parse_ticker_cfgs(values: &[String]) -> Result<Vec<TickerCfg>> {
    if values.len() % 5 != 0 {
        bail!(
            "ticker parameters must come in quintuples of CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS, got {} values",
            values.len()
        );
    }

    values
        .chunks_exact(5)
        .enumerate()
        .map(|(ticker, chunk)| {
            let parse_err = |field: &str, raw: &str| {
                anyhow::anyhow!("ticker {ticker}: invalid {field} value '{raw}'")
            };
            Ok(TickerCfg {
                clip: chunk[0].parse().map_err(|_| parse_err("CLIP", &chunk[0]))?,
                threshold: chunk[1]
                    .parse()
                    .map_err(|_| parse_err("THRESH", &chunk[1]))?,
                risk: RiskCfg {
                    max_order_size: chunk[2]
                        .parse()
                        .map_err(|_| parse_err("MAX_ORDER_SIZE", &chunk[2]))?,
                    max_position: chunk[3]
                        .parse()
                        .map_err(|_| parse_err("MAX_POS", &chunk[3]))?,
                    max_loss: chunk[4]
                        .parse()
                        .map_err(|_| parse_err("MAX_LOSS", &chunk[4]))?,
                },
            })
        })
        .collect()
}

/// Park the main thread until the kill switch trips.
///
/// The main thread is not a pipeline stage, so sleeping here is fine.
pub fn wait_for_shutdown(kill_switch: &KillSwitch) {
    while !kill_switch.should_stop() {
        std::thread::sleep(Duration::from_millis(100));
    }
    tracing::info!("shutdown signal received, tearing down");
}
