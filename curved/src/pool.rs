//! Global datagram buffer pool.
//!
//! Every buffer is exactly [`MAX_DATAGRAM`] bytes, the largest CurveCP
//! packet. The pool itself is bounded; when it runs dry, `acquire` falls
//! back to a fresh allocation, and buffers offered to a full pool are simply
//! dropped. Buffers are zeroed on release so a recycled buffer is
//! indistinguishable from a fresh one and never leaks bytes across flows.
//!
//! Ownership is linear: a buffer moves from the read loop through the
//! listener and possibly into a connection, and whichever component sees it
//! last releases it.

use crossbeam_channel::{bounded, Receiver, Sender};
use curved_curvecp::packet::MAX_DATAGRAM;
use once_cell::sync::Lazy;
use std::net::SocketAddr;

/// Upper bound on pooled (idle) buffers.
pub const POOL_SLOTS: usize = 1024;

static PACKETS: Lazy<PacketPool> = Lazy::new(|| PacketPool::new(MAX_DATAGRAM, POOL_SLOTS));

/// The shared pool of packet buffers.
pub fn packets() -> &'static PacketPool {
    &PACKETS
}

/// A received datagram: source address plus pooled buffer, truncated to the
/// received length.
#[derive(Debug)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub buf: Vec<u8>,
}

/// Fixed-slot-size buffer pool over a bounded channel. Both operations are
/// non-blocking.
pub struct PacketPool {
    size: usize,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl PacketPool {
    pub fn new(size: usize, slots: usize) -> Self {
        let (tx, rx) = bounded(slots);
        Self { size, tx, rx }
    }

    /// A zeroed buffer of the slot size, recycled when one is available.
    pub fn acquire(&self) -> Vec<u8> {
        self.rx.try_recv().unwrap_or_else(|_| vec![0u8; self.size])
    }

    /// Return a buffer to the pool. Buffers of the wrong capacity are
    /// dropped; accepted buffers are restored to slot length and zeroed.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() != self.size {
            return;
        }
        buf.clear();
        buf.resize(self.size, 0);
        let _ = self.tx.try_send(buf);
    }

    /// Idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.rx.len()
    }
}
