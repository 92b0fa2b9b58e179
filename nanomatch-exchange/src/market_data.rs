//! UDP multicast market-data publisher
//!
//! Consumes the market-updates ring and fans the stream out on two
//! multicast groups: every update goes out immediately on the incremental
//! group with a monotone sequence number, and at a fixed interval the
//! publisher synthesizes a snapshot cycle - SnapshotStart, the last known
//! state of every live order, SnapshotEnd - on the snapshot group so late
//! joiners can build a book without replaying the incremental stream from
//! the beginning.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam::utils::Backoff;

use nanomatch_core::config::constants::{
    INCREMENTAL_MCAST_IP, INCREMENTAL_MCAST_PORT, SNAPSHOT_INTERVAL_NS, SNAPSHOT_MCAST_IP,
    SNAPSHOT_MCAST_PORT,
};
use nanomatch_core::core::messages::{MarketUpdate, MarketUpdateKind, SeqMarketUpdate};
use nanomatch_core::core::types::{OrderId, TickerId, ORDER_ID_INVALID, PRICE_INVALID};
use nanomatch_core::perf::spsc::Consumer;
use nanomatch_core::perf::{cpu, timer};

/// Publisher endpoints and placement.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub snapshot_addr: SocketAddr,
    pub incremental_addr: SocketAddr,
    pub snapshot_interval_ns: u64,
    pub core: Option<usize>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            snapshot_addr: SocketAddr::new(
                SNAPSHOT_MCAST_IP.parse::<Ipv4Addr>().expect("valid group").into(),
                SNAPSHOT_MCAST_PORT,
            ),
            incremental_addr: SocketAddr::new(
                INCREMENTAL_MCAST_IP.parse::<Ipv4Addr>().expect("valid group").into(),
                INCREMENTAL_MCAST_PORT,
            ),
            snapshot_interval_ns: SNAPSHOT_INTERVAL_NS,
            core: None,
        }
    }
}

/// The market-data pipeline stage.
pub struct MarketDataPublisher {
    inner: Option<PublisherLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MarketDataPublisher {
    pub fn new(config: PublisherConfig, updates: Consumer<MarketUpdate>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind publisher socket")?;
        socket
            .set_multicast_ttl_v4(1)
            .context("failed to set multicast TTL")?;
        // Local consumers (same host) see the stream too.
        socket
            .set_multicast_loop_v4(true)
            .context("failed to enable multicast loopback")?;

        Ok(Self {
            inner: Some(PublisherLoop {
                updates,
                socket,
                config,
                incremental_seq: 1,
                snapshot_seq: 1,
                live_orders: HashMap::with_capacity(1024),
                send_errors: 0,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(publisher_loop) = self.inner.take() else {
            bail!("market data publisher already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("md-publisher".into())
            .spawn(move || publisher_loop.run(&running))
            .context("failed to spawn md-publisher thread")?;
        self.thread = Some(handle);
        tracing::info!("market data publisher started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("market data publisher stopped");
    }
}

impl Drop for MarketDataPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PublisherLoop {
    updates: Consumer<MarketUpdate>,
    socket: UdpSocket,
    config: PublisherConfig,
    incremental_seq: u64,
    snapshot_seq: u64,
    live_orders: HashMap<(TickerId, OrderId), MarketUpdate>,
    send_errors: u64,
}

impl PublisherLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("md-publisher", self.config.core);

        let mut last_snapshot_ns = timer::now_ns();
        let backoff = Backoff::new();

        while running.load(Ordering::Acquire) {
            if self.publish_one() {
                backoff.reset();
            } else {
                backoff.snooze();
            }

            let now_ns = timer::now_ns();
            if now_ns.saturating_sub(last_snapshot_ns) >= self.config.snapshot_interval_ns {
                self.publish_snapshot();
                last_snapshot_ns = now_ns;
            }
        }

        // Drain the ring so the matcher's final updates reach the wire.
        let mut drained = 0u64;
        while self.publish_one() {
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(drained, "publisher drained remaining updates on shutdown");
        }
        tracing::info!(
            incremental_seq = self.incremental_seq,
            send_errors = self.send_errors,
            "market data publisher exiting"
        );
    }

    /// Publish at most one incremental update. Returns false when idle.
    fn publish_one(&mut self) -> bool {
        let update = match self.updates.peek_read() {
            Some(update) => *update,
            None => return false,
        };
        self.updates.commit_read();

        self.track(&update);

        let framed = SeqMarketUpdate {
            seq: self.incremental_seq,
            update,
        };
        self.incremental_seq += 1;
        self.send(&framed.encode(), self.config.incremental_addr);
        true
    }

    /// Keep the last known state of each live order for snapshot synthesis.
    fn track(&mut self, update: &MarketUpdate) {
        let key = (update.ticker_id, update.order_id);
        match update.kind {
            MarketUpdateKind::Add | MarketUpdateKind::Modify => {
                let mut resting = *update;
                resting.kind = MarketUpdateKind::Add;
                self.live_orders.insert(key, resting);
            }
            MarketUpdateKind::Cancel => {
                self.live_orders.remove(&key);
            }
            MarketUpdateKind::Trade
            | MarketUpdateKind::Clear
            | MarketUpdateKind::SnapshotStart
            | MarketUpdateKind::SnapshotEnd
            | MarketUpdateKind::Invalid => {}
        }
    }

    fn publish_snapshot(&mut self) {
        let marker = MarketUpdate {
            kind: MarketUpdateKind::SnapshotStart,
            // Carries the incremental sequence the snapshot is current to.
            order_id: self.incremental_seq - 1,
            ticker_id: 0,
            side: nanomatch_core::core::types::Side::Invalid,
            price: PRICE_INVALID,
            qty: 0,
            priority: 0,
        };
        self.send_snapshot_frame(marker);

        let orders: Vec<MarketUpdate> = self.live_orders.values().copied().collect();
        for order in orders {
            self.send_snapshot_frame(order);
        }

        let mut end = marker;
        end.kind = MarketUpdateKind::SnapshotEnd;
        end.order_id = ORDER_ID_INVALID;
        self.send_snapshot_frame(end);

        tracing::debug!(
            live_orders = self.live_orders.len(),
            seq = self.snapshot_seq,
            "snapshot cycle published"
        );
    }

    fn send_snapshot_frame(&mut self, update: MarketUpdate) {
        let framed = SeqMarketUpdate {
            seq: self.snapshot_seq,
            update,
        };
        self.snapshot_seq += 1;
        self.send(&framed.encode(), self.config.snapshot_addr);
    }

    fn send(&mut self, payload: &[u8], target: SocketAddr) {
        if let Err(error) = self.socket.send_to(payload, target) {
            self.send_errors += 1;
            // Transient socket errors must not kill the stage; log sparsely.
            if self.send_errors.is_power_of_two() {
                tracing::warn!(%error, %target, total = self.send_errors, "multicast send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanomatch_core::core::types::Side;
    use nanomatch_core::perf::spsc;
    use std::time::Duration;

    fn test_config(port_base: u16) -> PublisherConfig {
        // Loopback unicast keeps the test independent of multicast routing.
        PublisherConfig {
            snapshot_addr: format!("127.0.0.1:{}", port_base).parse().unwrap(),
            incremental_addr: format!("127.0.0.1:{}", port_base + 1).parse().unwrap(),
            snapshot_interval_ns: u64::MAX,
            core: None,
        }
    }

    #[test]
    fn test_incremental_stream_sequenced() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let incremental_addr = receiver.local_addr().unwrap();

        let (mut upd_tx, upd_rx) = spsc::ring::<MarketUpdate>(64);
        let config = PublisherConfig {
            snapshot_addr: "127.0.0.1:1".parse().unwrap(),
            incremental_addr,
            snapshot_interval_ns: u64::MAX,
            core: None,
        };
        let mut publisher = MarketDataPublisher::new(config, upd_rx).unwrap();
        publisher.start().unwrap();

        for order_id in 1..=3u64 {
            assert!(upd_tx.push(MarketUpdate {
                kind: MarketUpdateKind::Add,
                order_id,
                ticker_id: 0,
                side: Side::Buy,
                price: 100,
                qty: 1,
                priority: order_id,
            }));
        }

        let mut buf = [0u8; SeqMarketUpdate::ENCODED_LEN];
        for expected_seq in 1..=3u64 {
            let (received, _) = receiver.recv_from(&mut buf).unwrap();
            assert_eq!(received, SeqMarketUpdate::ENCODED_LEN);
            let framed = SeqMarketUpdate::decode(&buf).unwrap();
            assert_eq!(framed.seq, expected_seq);
            assert_eq!(framed.update.order_id, expected_seq);
        }

        publisher.stop();
    }

    #[test]
    fn test_snapshot_tracks_live_orders() {
        let (mut upd_tx, upd_rx) = spsc::ring::<MarketUpdate>(64);
        let mut publisher =
            MarketDataPublisher::new(test_config(1), upd_rx).unwrap();
        let mut publisher_loop = publisher.inner.take().unwrap();

        let add = MarketUpdate {
            kind: MarketUpdateKind::Add,
            order_id: 10,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 5,
            priority: 1,
        };
        assert!(upd_tx.push(add));
        assert!(publisher_loop.publish_one());
        assert_eq!(publisher_loop.live_orders.len(), 1);

        let mut modify = add;
        modify.kind = MarketUpdateKind::Modify;
        modify.qty = 3;
        assert!(upd_tx.push(modify));
        assert!(publisher_loop.publish_one());
        assert_eq!(
            publisher_loop.live_orders[&(0, 10)].qty,
            3,
            "modify replaces retained state"
        );

        let mut cancel = add;
        cancel.kind = MarketUpdateKind::Cancel;
        assert!(upd_tx.push(cancel));
        assert!(publisher_loop.publish_one());
        assert!(publisher_loop.live_orders.is_empty());
    }
}
