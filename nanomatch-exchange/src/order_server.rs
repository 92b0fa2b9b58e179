//! TCP order server
//!
//! The exchange's order-entry front end. A nonblocking listener accepts
//! client connections, reads fixed-size sequenced request frames, checks
//! per-connection sequence continuity, and forwards requests onto the
//! client-requests ring. Responses coming back from the matcher are routed
//! to the owning connection and written out with an outbound sequence
//! number.
//!
//! The server is the single producer of the requests ring and the single
//! consumer of the responses ring.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
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

/// The order-entry pipeline stage.
pub struct OrderServer {
    inner: Option<ServerLoop>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OrderServer {
    /// Bind the listener eagerly so startup failures surface here, not on
    /// the stage thread.
    pub fn new(
        listen_addr: &str,
        requests: Producer<ClientRequest>,
        responses: Consumer<ClientResponse>,
        core: Option<usize>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .with_context(|| format!("failed to bind order server on {listen_addr}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to set listener nonblocking")?;
        tracing::info!(addr = listen_addr, "order server listening");

        Ok(Self {
            inner: Some(ServerLoop {
                listener,
                requests,
                responses,
                core,
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let Some(server_loop) = self.inner.take() else {
            bail!("order server already started");
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("order-server".into())
            .spawn(move || server_loop.run(&running))
            .context("failed to spawn order-server thread")?;
        self.thread = Some(handle);
        tracing::info!("order server started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("order server stopped");
    }
}

impl Drop for OrderServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ServerLoop {
    listener: TcpListener,
    requests: Producer<ClientRequest>,
    responses: Consumer<ClientResponse>,
    core: Option<usize>,
}

impl ServerLoop {
    fn run(mut self, running: &AtomicBool) {
        cpu::setup_stage_thread("order-server", self.core);

        let mut connections: Vec<Connection> = Vec::new();
        let backoff = Backoff::new();

        while running.load(Ordering::Acquire) {
            let mut activity = false;

            activity |= self.accept_new(&mut connections);

            for connection in &mut connections {
                activity |= connection.read_requests(&mut self.requests);
            }

            activity |= Self::route_responses(&mut self.responses, &mut connections);

            for connection in &mut connections {
                connection.flush();
            }
            connections.retain(|connection| {
                if connection.dead {
                    tracing::info!(peer = %connection.peer, "connection closed");
                }
                !connection.dead
            });

            if activity {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }

        // The server stops after the matcher, so the responses ring is
        // complete by now; route everything and keep flushing until the
        // sockets accept it or the retry budget runs out.
        let mut retries = 0;
        loop {
            Self::route_responses(&mut self.responses, &mut connections);
            for connection in &mut connections {
                connection.flush();
            }
            let pending = self.responses.size() > 0
                || connections
                    .iter()
                    .any(|connection| !connection.dead && !connection.tx_buf.is_empty());
            if !pending || retries >= SHUTDOWN_FLUSH_RETRIES {
                break;
            }
            retries += 1;
            thread::sleep(Duration::from_millis(1));
        }
        tracing::info!(connections = connections.len(), "order server exiting");
    }

    fn accept_new(&mut self, connections: &mut Vec<Connection>) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(error) = Connection::prepare(&stream) {
                        tracing::warn!(%peer, %error, "rejecting connection");
                        continue;
                    }
                    tracing::info!(%peer, "client connected");
                    connections.push(Connection::new(stream, peer));
                    accepted = true;
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    break;
                }
            }
        }
        accepted
    }

    fn route_responses(
        responses: &mut Consumer<ClientResponse>,
        connections: &mut [Connection],
    ) -> bool {
        let mut routed = false;
        while let Some(response) = responses.pop() {
            routed = true;
            match connections
                .iter_mut()
                .find(|c| !c.dead && c.client_id == Some(response.client_id))
            {
                Some(connection) => connection.queue_response(&response),
                None => {
                    tracing::warn!(%response, "no connection for client, dropping response");
                }
            }
        }
        routed
    }
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    client_id: Option<ClientId>,
    next_in_seq: u64,
    next_out_seq: u64,
    rx_buf: Vec<u8>,
    tx_buf: Vec<u8>,
    dead: bool,
}

impl Connection {
    fn prepare(stream: &TcpStream) -> Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(())
    }

    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            client_id: None,
            next_in_seq: 1,
            next_out_seq: 1,
            rx_buf: Vec::with_capacity(4096),
            tx_buf: Vec::with_capacity(4096),
            dead: false,
        }
    }

    /// Read all available bytes and forward every complete frame.
    fn read_requests(&mut self, requests: &mut Producer<ClientRequest>) -> bool {
        if self.dead {
            return false;
        }

        let mut scratch = [0u8; 4096];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    self.dead = true;
                    break;
                }
                Ok(n) => self.rx_buf.extend_from_slice(&scratch[..n]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::warn!(peer = %self.peer, %error, "read failed");
                    self.dead = true;
                    break;
                }
            }
        }

        let mut forwarded = false;
        while self.rx_buf.len() >= SeqClientRequest::ENCODED_LEN {
            let Some(frame) = SeqClientRequest::decode(&self.rx_buf[..SeqClientRequest::ENCODED_LEN])
            else {
                tracing::warn!(peer = %self.peer, "undecodable frame, closing connection");
                self.dead = true;
                self.rx_buf.clear();
                break;
            };
            self.rx_buf.drain(..SeqClientRequest::ENCODED_LEN);

            if frame.seq != self.next_in_seq {
                tracing::warn!(
                    peer = %self.peer,
                    expected = self.next_in_seq,
                    received = frame.seq,
                    "inbound sequence gap, resyncing"
                );
            }
            self.next_in_seq = frame.seq + 1;

            if self.client_id.is_none() {
                self.client_id = Some(frame.request.client_id);
                tracing::info!(peer = %self.peer, client = frame.request.client_id, "client identified");
            }

            if requests.push(frame.request) {
                forwarded = true;
            } else {
                tracing::warn!(peer = %self.peer, "client-requests ring full, dropping request");
            }
        }
        forwarded
    }

    fn queue_response(&mut self, response: &ClientResponse) {
        let framed = SeqClientResponse {
            seq: self.next_out_seq,
            response: *response,
        };
        self.next_out_seq += 1;
        self.tx_buf.extend_from_slice(&framed.encode());
    }

    fn flush(&mut self) {
        if self.dead || self.tx_buf.is_empty() {
            return;
        }
        match self.stream.write(&self.tx_buf) {
            Ok(written) => {
                self.tx_buf.drain(..written);
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::warn!(peer = %self.peer, %error, "write failed");
                self.dead = true;
            }
        }
    }
}
