//! TCP order gateway
//!
//! The client's connection to the exchange order server. Consumes the
//! requests ring, frames each request with an outbound sequence number,
//! and writes it to the socket; reads sequenced responses back, checks
//! continuity, and produces them onto the responses ring.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam::utils::Backoff;

use nanomatch_core::core::messages::{
    ClientRequest, ClientResponse, SeqClientRequest, SeqClientResponse,
};
use nanomatch_core::core::types::ClientId;
use nanomatch_core::perf::cpu;
use nanomatch_core::perf::spsc::{Consumer, Producer};

/// Flush attempts granted to the shutdown drain before giving up on a
/// socket that will not accept the remaining bytes.
const SHUTDOWN_FLUSH_RETRIES: usize = 100;

/// The order-gateway pipeline stage.
pub struct OrderGateway {
    inner: Option<GatewayLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OrderGateway {
    /// Connect eagerly; a dead exchange endpoint is a startup error.
    pub fn new(
        client_id: ClientId,
        exchange_addr: &str,
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        core: Option<usize>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(exchange_addr)
            .with_context(|| format!("failed to connect to exchange at {exchange_addr}"))?;
        stream.set_nodelay(true).context("failed to set nodelay")?;
        stream
            .set_nonblocking(true)
            .context("failed to set nonblocking")?;
        tracing::info!(client = client_id, addr = exchange_addr, "gateway connected");

        Ok(Self {
            inner: Some(GatewayLoop {
                client_id,
                stream,
                requests,
                responses,
                core,
                next_out_seq: 1,
                next_in_seq: 1,
                rx_buf: Vec::with_capacity(4096),
                tx_buf: Vec::with_capacity(4096),
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(gateway_loop) = self.inner.take() else {
            bail!("order gateway already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("order-gateway".into())
            .spawn(move || gateway_loop.run(&running))
            .context("failed to spawn order-gateway thread")?;
        self.thread = Some(handle);
        tracing::info!("order gateway started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("order gateway stopped");
    }
}

impl Drop for OrderGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

struct GatewayLoop {
    client_id: ClientId,
    stream: TcpStream,
    requests: Consumer<ClientRequest>,
    responses: Producer<ClientResponse>,
    core: Option<usize>,
    next_out_seq: u64,
    next_in_seq: u64,
    rx_buf: Vec<u8>,
    tx_buf: Vec<u8>,
}

impl GatewayLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("order-gateway", self.core);

        let backoff = Backoff::new();
        while running.load(Ordering::Acquire) {
            let mut activity = false;
            activity |= self.send_requests();
            activity |= self.flush();
            activity |= self.receive_responses();

            if activity {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }

        // Ship what the engine already queued, then surface the last
        // responses: the gateway stops before the trade engine, whose own
        // shutdown drain picks them off the ring.
        self.send_requests();
        let mut retries = 0;
        while !self.tx_buf.is_empty() && retries < SHUTDOWN_FLUSH_RETRIES {
            if !self.flush() {
                thread::sleep(Duration::from_millis(1));
            }
            retries += 1;
        }
        self.receive_responses();
        tracing::info!(
            sent = self.next_out_seq - 1,
            received = self.next_in_seq - 1,
            "order gateway exiting"
        );
    }

    fn send_requests(&mut self) -> bool {
        let mut queued = false;
        while let Some(request) = self.requests.pop() {
            let framed = SeqClientRequest {
                seq: self.next_out_seq,
                request,
            };
            self.next_out_seq += 1;
            self.tx_buf.extend_from_slice(&framed.encode());
            queued = true;
        }
        queued
    }

    fn flush(&mut self) -> bool {
        if self.tx_buf.is_empty() {
            return false;
        }
        match self.stream.write(&self.tx_buf) {
            Ok(written) => {
                self.tx_buf.drain(..written);
                written > 0
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => false,
            Err(error) => {
                tracing::error!(%error, "gateway write failed");
                self.tx_buf.clear();
                false
            }
        }
    }

    fn receive_responses(&mut self) -> bool {
        let mut scratch = [0u8; 4096];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    tracing::error!("exchange closed the order connection");
                    break;
                }
                Ok(n) => self.rx_buf.extend_from_slice(&scratch[..n]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::error!(%error, "gateway read failed");
                    break;
                }
            }
        }

        let mut produced = false;
        while self.rx_buf.len() >= SeqClientResponse::ENCODED_LEN {
            let Some(framed) =
                SeqClientResponse::decode(&self.rx_buf[..SeqClientResponse::ENCODED_LEN])
            else {
                tracing::error!("undecodable response frame, discarding buffer");
                self.rx_buf.clear();
                break;
            };
            self.rx_buf.drain(..SeqClientResponse::ENCODED_LEN);

            if framed.seq != self.next_in_seq {
                tracing::warn!(
                    expected = self.next_in_seq,
                    received = framed.seq,
                    "response sequence gap"
                );
            }
            self.next_in_seq = framed.seq + 1;

            if framed.response.client_id != self.client_id {
                tracing::warn!(%framed.response, "response for another client, dropping");
                continue;
            }
            if self.responses.push(framed.response) {
                produced = true;
            } else {
                tracing::warn!("client-responses ring full, dropping response");
            }
        }
        produced
    }
}
