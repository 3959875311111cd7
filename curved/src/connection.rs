//! Per-connection reliable stream engine.
//!
//! Each accepted flow is driven by exactly one pump task that owns all of
//! the connection's mutable state: the preallocated send blocks, the receive
//! ring, the Chicago scheduler and the nonce counters. The [`Connection`]
//! handle talks to the pump over channels.
//!
//! ## Rendezvous
//!
//! User reads and writes are a two-phase rendezvous. Phase one offers a
//! request on a channel and is the only part a deadline can cancel; once the
//! pump claims the offer it completes the operation promptly and reports the
//! result, because cancelling a claimed read would leave a gap in the
//! stream. The claim itself is a compare-and-swap, so a deadline racing the
//! pump resolves to exactly one winner.
//!
//! ## Send path
//!
//! A write copies up to 1024 bytes into a free block stamped with its stream
//! position and queues it. The pump seals the head of the queue into a
//! server Message whenever the scheduler's throttle allows, then parks the
//! block in flight until the client's cumulative acknowledgment covers it.
//! Blocks whose retransmit deadline lapses return to the head of the queue.
//! Every transmission carries a fresh message id, so an acknowledgment
//! naming one is an unambiguous RTT sample.
//!
//! ## Receive path
//!
//! Only in-order data enters the ring: a child at the contiguous position
//! is appended (minus any already-received prefix), anything beyond it is
//! dropped and must be retransmitted. Data that does not fit the ring is
//! dropped too; the acknowledgment only ever covers stored bytes.

use crate::error::{Error, Result};
use crate::pool::{self, Datagram};
use bytes::Bytes;
use curved_curvecp::packet::{child::Child, initiate, message};
use curved_curvecp::{Chicago, RingBuf, SalsaBox};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, trace};

/// Preallocated send blocks per connection: 128 KiB of send window.
pub const SEND_BLOCKS: usize = 128;

/// Stream bytes per block, and per Message.
pub const BLOCK_LEN: usize = 1024;

/// Receive ring capacity.
const RECV_BUFFER: usize = 64 * 1024;

/// How long a closing connection keeps retransmitting unacknowledged data
/// before giving up.
const CLOSE_DRAIN_LIMIT: Duration = Duration::from_secs(5);

// ============================================================================
// Offer states for the two-phase rendezvous
// ============================================================================

const OFFERED: u8 = 0;
const CLAIMED: u8 = 1;
const CANCELLED: u8 = 2;

/// One user I/O offer. The pump claims it, or the deadline cancels it;
/// the compare-and-swap guarantees exactly one of the two happens.
#[derive(Clone)]
struct Offer(Arc<AtomicU8>);

impl Offer {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(OFFERED)))
    }

    /// Pump side: take the offer. Fails if the deadline got there first.
    fn claim(&self) -> bool {
        self.0
            .compare_exchange(OFFERED, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// User side: withdraw the offer. Fails if the pump already claimed it.
    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(OFFERED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct ReadRequest {
    max: usize,
    offer: Offer,
    reply: oneshot::Sender<Vec<u8>>,
}

struct WriteRequest {
    data: Bytes,
    offer: Offer,
    reply: oneshot::Sender<usize>,
}

/// Packets the listener forwards to a connection, already classified and,
/// for Initiates, already verified with the box replaced by its plaintext.
pub(crate) enum Inbound {
    Initiate(Datagram),
    Message(Datagram),
}

// ============================================================================
// User-facing handle
// ============================================================================

/// One accepted CurveCP flow, as an ordered reliable byte stream.
///
/// Reads and writes take `&mut self`: a connection has one reader and one
/// writer. Deadlines are absolute; `None` means no deadline. A deadline
/// gates only the offer phase of an operation (see the module docs).
pub struct Connection {
    peer_identity: [u8; 32],
    domain: String,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    read_tx: mpsc::Sender<ReadRequest>,
    write_tx: mpsc::Sender<WriteRequest>,
    close_tx: mpsc::Sender<()>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Connection {
    /// Read into `dst`, returning once any bytes are available. Returns
    /// `Ok(0)` only for an empty `dst` or after the peer ended the stream.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let offer = Offer::new();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let request = ReadRequest {
            max: dst.len(),
            offer: offer.clone(),
            reply: reply_tx,
        };

        match self.read_deadline {
            Some(at) => tokio::select! {
                sent = self.read_tx.send(request) => {
                    sent.map_err(|_| Error::ConnectionClosed)?;
                }
                _ = time::sleep_until(at) => return Err(Error::DeadlineExceeded),
            },
            None => self
                .read_tx
                .send(request)
                .await
                .map_err(|_| Error::ConnectionClosed)?,
        }

        let chunk = match self.read_deadline {
            Some(at) => tokio::select! {
                got = &mut reply_rx => got.map_err(|_| Error::ConnectionClosed)?,
                _ = time::sleep_until(at) => {
                    if offer.cancel() {
                        return Err(Error::DeadlineExceeded);
                    }
                    // The pump claimed the offer first; it completes the
                    // operation promptly and the deadline no longer applies.
                    reply_rx.await.map_err(|_| Error::ConnectionClosed)?
                }
            },
            None => reply_rx.await.map_err(|_| Error::ConnectionClosed)?,
        };

        dst[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Write all of `src`, or as much as possible before an error. Returns
    /// the bytes written and the error that stopped the write, if any.
    pub async fn write(&mut self, src: &[u8]) -> (usize, Option<Error>) {
        let data = Bytes::copy_from_slice(src);
        let mut written = 0;
        while written < data.len() {
            match self.write_chunk(data.slice(written..)).await {
                Ok(n) => written += n,
                Err(err) => return (written, Some(err)),
            }
        }
        (written, None)
    }

    /// One offer to the pump; the pump consumes at most one block's worth.
    async fn write_chunk(&mut self, data: Bytes) -> Result<usize> {
        let offer = Offer::new();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let request = WriteRequest {
            data,
            offer: offer.clone(),
            reply: reply_tx,
        };

        match self.write_deadline {
            Some(at) => tokio::select! {
                sent = self.write_tx.send(request) => {
                    sent.map_err(|_| Error::ConnectionClosed)?;
                }
                _ = time::sleep_until(at) => return Err(Error::DeadlineExceeded),
            },
            None => self
                .write_tx
                .send(request)
                .await
                .map_err(|_| Error::ConnectionClosed)?,
        }

        match self.write_deadline {
            Some(at) => tokio::select! {
                got = &mut reply_rx => got.map_err(|_| Error::ConnectionClosed),
                _ = time::sleep_until(at) => {
                    if offer.cancel() {
                        return Err(Error::DeadlineExceeded);
                    }
                    reply_rx.await.map_err(|_| Error::ConnectionClosed)
                }
            },
            None => reply_rx.await.map_err(|_| Error::ConnectionClosed),
        }
    }

    /// Terminate the flow. Queued data is retransmitted for a bounded drain
    /// period, then the connection deregisters; user I/O offered after this
    /// fails with [`Error::ConnectionClosed`].
    pub fn close(&self) {
        let _ = self.close_tx.try_send(());
    }

    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline = at;
        self.write_deadline = at;
    }

    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline = at;
    }

    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline = at;
    }

    /// The client's long-term public key, as vouched in its Initiate.
    pub fn peer_identity(&self) -> &[u8; 32] {
        &self.peer_identity
    }

    /// The server domain name the client asked for.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Everything the listener hands over when admitting a flow.
pub(crate) struct Params {
    pub sock: Arc<UdpSocket>,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub summary: initiate::Summary,
    pub client_ext: [u8; 16],
    pub server_ext: [u8; 16],
    pub inbound_rx: mpsc::Receiver<Inbound>,
    pub done_tx: mpsc::Sender<[u8; 32]>,
}

/// Build the handle and start the pump task.
pub(crate) fn spawn(p: Params) -> Connection {
    let (read_tx, read_rx) = mpsc::channel(1);
    let (write_tx, write_rx) = mpsc::channel(1);
    let (close_tx, close_rx) = mpsc::channel(1);

    let shared = SalsaBox::new(&p.summary.client_short_pk, &p.summary.server_short_sk);
    let connection = Connection {
        peer_identity: *p.summary.client_long_pk.as_bytes(),
        domain: p.summary.domain.clone(),
        local_addr: p.local_addr,
        peer_addr: p.peer_addr,
        read_tx,
        write_tx,
        close_tx,
        read_deadline: None,
        write_deadline: None,
    };

    let pump = Pump {
        sock: p.sock,
        peer_addr: p.peer_addr,
        shared,
        client_short_key: *p.summary.client_short_pk.as_bytes(),
        client_ext: p.client_ext,
        server_ext: p.server_ext,
        inbound_rx: p.inbound_rx,
        read_rx,
        write_rx,
        close_rx,
        done_tx: p.done_tx,
        received: RingBuf::new(RECV_BUFFER),
        recv_contiguous: 0,
        last_recv_nonce: 0,
        last_data_id: 0,
        peer_finished: false,
        send_free: (0..SEND_BLOCKS).map(|_| Block::new()).collect(),
        to_send: VecDeque::new(),
        in_flight: Vec::new(),
        send_enqueued: 0,
        next_id: 0,
        send_nonce: 0,
        last_tx: None,
        chicago: Chicago::new(),
        failed: false,
    };
    tokio::spawn(pump.run());

    connection
}

/// A preallocated send block. `pos` is the stream offset of its first byte;
/// `last_id` identifies its most recent transmission.
struct Block {
    data: Box<[u8; BLOCK_LEN]>,
    len: usize,
    pos: u64,
    last_id: u32,
    sent_at: Instant,
    deadline: Instant,
}

impl Block {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; BLOCK_LEN]),
            len: 0,
            pos: 0,
            last_id: 0,
            sent_at: Instant::now(),
            deadline: Instant::now(),
        }
    }
}

struct Pump {
    sock: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    shared: SalsaBox,
    client_short_key: [u8; 32],
    client_ext: [u8; 16],
    server_ext: [u8; 16],

    inbound_rx: mpsc::Receiver<Inbound>,
    read_rx: mpsc::Receiver<ReadRequest>,
    write_rx: mpsc::Receiver<WriteRequest>,
    close_rx: mpsc::Receiver<()>,
    done_tx: mpsc::Sender<[u8; 32]>,

    received: RingBuf,
    /// Count of leading stream bytes received and stored; doubles as the
    /// cumulative acknowledgment we advertise.
    recv_contiguous: u64,
    last_recv_nonce: u64,
    /// Most recent data-bearing inbound message id, echoed as `ack_id`.
    last_data_id: u32,
    peer_finished: bool,

    send_free: Vec<Block>,
    to_send: VecDeque<Block>,
    in_flight: Vec<Block>,
    /// Total stream bytes accepted from writers.
    send_enqueued: u64,
    next_id: u32,
    send_nonce: u64,
    last_tx: Option<Instant>,
    chicago: Chicago,
    failed: bool,
}

impl Pump {
    async fn run(mut self) {
        debug!(peer = %self.peer_addr, "connection running");
        let mut drain_until: Option<Instant> = None;

        loop {
            if self.failed {
                break;
            }
            if drain_until.is_some() && self.to_send.is_empty() && self.in_flight.is_empty() {
                break;
            }
            let closing = drain_until.is_some();

            let next_tx = if self.to_send.is_empty() {
                None
            } else {
                Some(
                    self.last_tx
                        .map_or_else(Instant::now, |at| at + self.chicago.tx_throttle()),
                )
            };
            let next_rto = self.in_flight.iter().map(|b| b.deadline).min();

            tokio::select! {
                biased;
                _ = self.close_rx.recv(), if !closing => {
                    debug!(peer = %self.peer_addr, "connection closing");
                    drain_until = Some(Instant::now() + CLOSE_DRAIN_LIMIT);
                }
                maybe = self.inbound_rx.recv() => match maybe {
                    Some(inbound) => self.handle_inbound(inbound).await,
                    // The listener is gone; nothing more can arrive.
                    None => break,
                },
                Some(request) = self.read_rx.recv(),
                    if !closing && (!self.received.is_empty() || self.peer_finished) =>
                {
                    self.serve_read(request);
                }
                Some(request) = self.write_rx.recv(),
                    if !closing && !self.send_free.is_empty() =>
                {
                    self.serve_write(request);
                }
                _ = sleep_until_opt(next_tx) => self.transmit().await,
                _ = sleep_until_opt(next_rto) => self.requeue_expired(),
                _ = sleep_until_opt(drain_until) => break,
            }
        }

        let _ = self.done_tx.send(self.client_short_key).await;
        debug!(peer = %self.peer_addr, "connection ended");
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Initiate(d) => {
                // Crypto already done by the listener; only the embedded
                // message child matters here.
                let payload = initiate::plaintext_message(&d.buf).to_vec();
                if !payload.is_empty() {
                    self.process_payload(&payload).await;
                }
                pool::packets().release(d.buf);
            }
            Inbound::Message(d) => {
                if let Ok((nonce, payload)) = message::open_client(&self.shared, &d.buf) {
                    // Nonces never step backwards.
                    if nonce >= self.last_recv_nonce {
                        self.last_recv_nonce = nonce;
                        self.process_payload(&payload).await;
                    }
                }
                pool::packets().release(d.buf);
            }
        }
    }

    async fn process_payload(&mut self, payload: &[u8]) {
        let Ok(child) = Child::decode(payload) else {
            return;
        };
        self.apply_ack(&child);

        let carries_stream = !child.data.is_empty() || child.success || child.failure;
        if !carries_stream {
            return;
        }
        if child.id != 0 {
            self.last_data_id = child.id;
        }

        if child.position <= self.recv_contiguous {
            let skip = (self.recv_contiguous - child.position) as usize;
            if skip < child.data.len() {
                let stored = self.received.write(&child.data[skip..]);
                self.recv_contiguous += stored as u64;
                trace!(peer = %self.peer_addr, stored, "stream bytes received");
            }
            if (child.success || child.failure)
                && self.recv_contiguous >= child.position + child.data.len() as u64
            {
                self.peer_finished = true;
            }
        }
        // A gap means an earlier message is missing; the peer retransmits.

        self.send_ack().await;
    }

    /// Free every block the cumulative acknowledgment covers and feed the
    /// scheduler when the acknowledgment names a transmission we can time.
    fn apply_ack(&mut self, child: &Child<'_>) {
        if child.ack_id != 0 {
            if let Some(block) = self.in_flight.iter().find(|b| b.last_id == child.ack_id) {
                self.chicago
                    .adjust(block.sent_at.elapsed(), std::time::Instant::now());
            }
        }
        if child.ack_prefix == 0 {
            return;
        }
        let covered = |b: &Block| b.pos + b.len as u64 <= child.ack_prefix;

        let mut i = 0;
        while i < self.in_flight.len() {
            if covered(&self.in_flight[i]) {
                let block = self.in_flight.swap_remove(i);
                self.send_free.push(block);
            } else {
                i += 1;
            }
        }
        // A requeued retransmit may have been covered in the meantime.
        let mut i = 0;
        while i < self.to_send.len() {
            if covered(&self.to_send[i]) {
                if let Some(block) = self.to_send.remove(i) {
                    self.send_free.push(block);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Pure acknowledgment, sent promptly and exempt from the throttle.
    async fn send_ack(&mut self) {
        let child = Child::ack(self.last_data_id, self.recv_contiguous);
        self.send_payload(&child.encode()).await;
    }

    /// Seal the head of the queue and park it in flight.
    async fn transmit(&mut self) {
        let Some(mut block) = self.to_send.pop_front() else {
            return;
        };
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let now = Instant::now();
        block.last_id = self.next_id;
        block.sent_at = now;
        block.deadline = now + self.chicago.tx_timeout();

        let child = Child {
            id: block.last_id,
            ack_id: self.last_data_id,
            ack_prefix: self.recv_contiguous,
            success: false,
            failure: false,
            position: block.pos,
            data: &block.data[..block.len],
        };
        let payload = child.encode();
        self.last_tx = Some(now);
        self.in_flight.push(block);
        self.send_payload(&payload).await;
    }

    async fn send_payload(&mut self, payload: &[u8]) {
        self.send_nonce += 1;
        let Ok(pb) = message::seal_server(
            &self.shared,
            &self.client_ext,
            &self.server_ext,
            self.send_nonce,
            payload,
        ) else {
            return;
        };
        if self.sock.send_to(&pb, self.peer_addr).await.is_err() {
            // The socket is unusable; the pump winds down.
            self.failed = true;
        }
    }

    /// Expired in-flight blocks return to the head of the queue, earliest
    /// stream position first.
    fn requeue_expired(&mut self) {
        let now = Instant::now();
        let mut expired: Vec<Block> = Vec::new();
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].deadline <= now {
                expired.push(self.in_flight.remove(i));
            } else {
                i += 1;
            }
        }
        expired.sort_by_key(|b| b.pos);
        for block in expired.into_iter().rev() {
            trace!(peer = %self.peer_addr, pos = block.pos, "retransmit queued");
            self.to_send.push_front(block);
        }
    }

    fn serve_read(&mut self, request: ReadRequest) {
        if !request.offer.claim() {
            return;
        }
        if self.received.is_empty() {
            // Only reachable once the peer finished the stream: signal EOF.
            let _ = request.reply.send(Vec::new());
            return;
        }
        let mut chunk = vec![0u8; request.max.min(self.received.len())];
        let n = self.received.read(&mut chunk);
        chunk.truncate(n);
        let _ = request.reply.send(chunk);
    }

    fn serve_write(&mut self, request: WriteRequest) {
        if !request.offer.claim() {
            return;
        }
        let Some(mut block) = self.send_free.pop() else {
            // Unreachable: the select guard admits writes only with a free
            // block. Dropping the reply surfaces ConnectionClosed.
            return;
        };
        let n = request.data.len().min(BLOCK_LEN);
        block.data[..n].copy_from_slice(&request.data[..n]);
        block.len = n;
        block.pos = self.send_enqueued;
        self.send_enqueued += n as u64;
        self.to_send.push_back(block);
        let _ = request.reply.send(n);
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
