//! UDP multicast market-data consumer
//!
//! Joins the incremental and snapshot groups published by the exchange,
//! decodes sequenced updates, and produces them onto the market-updates
//! ring. Sequence gaps on the incremental stream are logged and tolerated:
//! the algo layer works from trades and top-of-book events and a
//! subsequent snapshot cycle restores any dropped resting-order state.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam::utils::Backoff;

use nanomatch_core::core::messages::{MarketUpdate, SeqMarketUpdate};
use nanomatch_core::perf::cpu;
use nanomatch_core::perf::spsc::Producer;

/// Consumer endpoints and placement.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub snapshot_group: Ipv4Addr,
    pub snapshot_port: u16,
    pub incremental_group: Ipv4Addr,
    pub incremental_port: u16,
    pub core: Option<usize>,
}

/// The market-data-consumer pipeline stage.
pub struct MarketDataConsumer {
    inner: Option<ConsumerLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MarketDataConsumer {
    pub fn new(config: ConsumerConfig, updates: Producer<MarketUpdate>) -> Result<Self> {
        let incremental =
            join_group(config.incremental_group, config.incremental_port).with_context(|| {
                format!(
                    "failed to join incremental group {}:{}",
                    config.incremental_group, config.incremental_port
                )
            })?;
        let snapshot = join_group(config.snapshot_group, config.snapshot_port).with_context(|| {
            format!(
                "failed to join snapshot group {}:{}",
                config.snapshot_group, config.snapshot_port
            )
        })?;

        Ok(Self {
            inner: Some(ConsumerLoop {
                incremental,
                snapshot,
                updates,
                core: config.core,
                next_inc_seq: 1,
                gaps: 0,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(consumer_loop) = self.inner.take() else {
            bail!("market data consumer already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("md-consumer".into())
            .spawn(move || consumer_loop.run(&running))
            .context("failed to spawn md-consumer thread")?;
        self.thread = Some(handle);
        tracing::info!("market data consumer started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("market data consumer stopped");
    }
}

impl Drop for MarketDataConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_group(group: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

struct ConsumerLoop {
    incremental: UdpSocket,
    snapshot: UdpSocket,
    updates: Producer<MarketUpdate>,
    core: Option<usize>,
    next_inc_seq: u64,
    gaps: u64,
}

impl ConsumerLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("md-consumer", self.core);

        let backoff = Backoff::new();
        while running.load(Ordering::Acquire) {
            let mut activity = false;
            activity |= self.drain_incremental();
            activity |= self.drain_snapshot();

            if activity {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        tracing::info!(
            last_seq = self.next_inc_seq - 1,
            gaps = self.gaps,
            "market data consumer exiting"
        );
    }

    fn drain_incremental(&mut self) -> bool {
        let mut received = false;
        let mut buf = [0u8; SeqMarketUpdate::ENCODED_LEN];
        loop {
            match self.incremental.recv_from(&mut buf) {
                Ok((len, _)) => {
                    let Some(framed) = SeqMarketUpdate::decode(&buf[..len]) else {
                        tracing::warn!(len, "undecodable incremental datagram");
                        continue;
                    };
                    if framed.seq != self.next_inc_seq {
                        self.gaps += 1;
                        tracing::warn!(
                            expected = self.next_inc_seq,
                            received = framed.seq,
                            "incremental sequence gap"
                        );
                    }
                    self.next_inc_seq = framed.seq + 1;
                    received |= self.forward(framed.update);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::warn!(%error, "incremental recv failed");
                    break;
                }
            }
        }
        received
    }

    fn drain_snapshot(&mut self) -> bool {
        let mut received = false;
        let mut buf = [0u8; SeqMarketUpdate::ENCODED_LEN];
        loop {
            match self.snapshot.recv_from(&mut buf) {
                Ok((len, _)) => {
                    let Some(framed) = SeqMarketUpdate::decode(&buf[..len]) else {
                        tracing::warn!(len, "undecodable snapshot datagram");
                        continue;
                    };
                    received |= self.forward(framed.update);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::warn!(%error, "snapshot recv failed");
                    break;
                }
            }
        }
        received
    }

    fn forward(&mut self, update: MarketUpdate) -> bool {
        if self.updates.push(update) {
            true
        } else {
            tracing::warn!("market-updates ring full, dropping update");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanomatch_core::core::messages::{MarketUpdateKind, SeqMarketUpdate};
    use nanomatch_core::core::types::Side;
    use nanomatch_core::perf::spsc;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    // Loopback unicast sockets stand in for the joined groups: the drain
    // logic is identical and the test stays independent of multicast
    // routing.
    fn loopback_consumer(
        updates: Producer<MarketUpdate>,
    ) -> (ConsumerLoop, SocketAddr, SocketAddr) {
        let incremental = UdpSocket::bind("127.0.0.1:0").unwrap();
        incremental.set_nonblocking(true).unwrap();
        let snapshot = UdpSocket::bind("127.0.0.1:0").unwrap();
        snapshot.set_nonblocking(true).unwrap();
        let incremental_addr = incremental.local_addr().unwrap();
        let snapshot_addr = snapshot.local_addr().unwrap();

        (
            ConsumerLoop {
                incremental,
                snapshot,
                updates,
                core: None,
                next_inc_seq: 1,
                gaps: 0,
            },
            incremental_addr,
            snapshot_addr,
        )
    }

    fn add_update(order_id: u64) -> MarketUpdate {
        MarketUpdate {
            kind: MarketUpdateKind::Add,
            order_id,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 1,
            priority: order_id,
        }
    }

    fn drain_until(
        consumer_loop: &mut ConsumerLoop,
        updates: &mut spsc::Consumer<MarketUpdate>,
        snapshot: bool,
        expected: usize,
    ) -> Vec<MarketUpdate> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < expected && Instant::now() < deadline {
            if snapshot {
                consumer_loop.drain_snapshot();
            } else {
                consumer_loop.drain_incremental();
            }
            while let Some(update) = updates.pop() {
                received.push(update);
            }
            thread::sleep(Duration::from_millis(1));
        }
        received
    }

    #[test]
    fn test_incremental_updates_forwarded_and_gaps_counted() {
        let (upd_tx, mut upd_rx) = spsc::ring::<MarketUpdate>(64);
        let (mut consumer_loop, incremental_addr, _) = loopback_consumer(upd_tx);
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Seq 3 and 4 went missing on the wire.
        for seq in [1u64, 2, 5] {
            let framed = SeqMarketUpdate {
                seq,
                update: add_update(seq),
            };
            sender.send_to(&framed.encode(), incremental_addr).unwrap();
        }

        let received = drain_until(&mut consumer_loop, &mut upd_rx, false, 3);
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].order_id, 1);
        assert_eq!(received[2].order_id, 5);

        // One gap, and the stream resyncs past it.
        assert_eq!(consumer_loop.gaps, 1);
        assert_eq!(consumer_loop.next_inc_seq, 6);
    }

    #[test]
    fn test_snapshot_stream_decoded() {
        let (upd_tx, mut upd_rx) = spsc::ring::<MarketUpdate>(64);
        let (mut consumer_loop, _, snapshot_addr) = loopback_consumer(upd_tx);
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut start = add_update(0);
        start.kind = MarketUpdateKind::SnapshotStart;
        let resting = add_update(10);
        let mut end = add_update(0);
        end.kind = MarketUpdateKind::SnapshotEnd;

        for (seq, update) in [(1u64, start), (2, resting), (3, end)] {
            let framed = SeqMarketUpdate { seq, update };
            sender.send_to(&framed.encode(), snapshot_addr).unwrap();
        }

        let received = drain_until(&mut consumer_loop, &mut upd_rx, true, 3);
        let kinds: Vec<_> = received.iter().map(|update| update.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MarketUpdateKind::SnapshotStart,
                MarketUpdateKind::Add,
                MarketUpdateKind::SnapshotEnd
            ]
        );
        assert_eq!(received[1].order_id, 10);

        // The snapshot stream never feeds incremental sequence tracking.
        assert_eq!(consumer_loop.gaps, 0);
        assert_eq!(consumer_loop.next_inc_seq, 1);
    }

    #[test]
    fn test_undecodable_datagram_skipped() {
        let (upd_tx, mut upd_rx) = spsc::ring::<MarketUpdate>(64);
        let (mut consumer_loop, incremental_addr, _) = loopback_consumer(upd_tx);
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Full-length garbage exercises the tag rejection, not just the
        // short-datagram path.
        sender
            .send_to(&[0xFF; SeqMarketUpdate::ENCODED_LEN], incremental_addr)
            .unwrap();
        let framed = SeqMarketUpdate {
            seq: 1,
            update: add_update(1),
        };
        sender.send_to(&framed.encode(), incremental_addr).unwrap();

        let received = drain_until(&mut consumer_loop, &mut upd_rx, false, 1);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].order_id, 1);
        assert_eq!(consumer_loop.gaps, 0);
        assert_eq!(consumer_loop.next_inc_seq, 2);
    }
}
