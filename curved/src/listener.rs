//! Packet pump and handshake listener.
//!
//! Two tasks per listener. The read loop owns the socket's receive side:
//! it pulls datagrams into pooled buffers and hands them to the pump. The
//! pump owns every piece of handshake state - the long-term secret key, the
//! two minute keys, the accepting flag and the flow table - and serializes
//! all of it through one select loop: inbound datagrams, the 30-second
//! rotation tick, close requests and connection-end signals.
//!
//! A Hello costs the server nothing but the Cookie it answers with. State
//! is allocated on the first authenticated Initiate, keyed by the client's
//! short-term public key; later packets for that key are forwarded to the
//! owning connection's channel.
//!
//! Closing is deterministic: `close` stops admitting flows, the next
//! rotation copies the current minute key into the previous slot, and the
//! one after wipes all long-lived secret material. The pump exits once the
//! last connection deregisters.

use crate::connection::{self, Connection, Inbound};
use crate::error::{Error, Result};
use crate::pool::{self, Datagram};
use curved_curvecp::packet::{self, cookie, hello, initiate, Kind};
use curved_curvecp::{MinuteKey, SecretKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

/// Production minute-key rotation period.
pub const DEFAULT_ROTATION: Duration = Duration::from_secs(30);

/// A CurveCP listener bound to a UDP socket.
pub struct Listener {
    accept_rx: Mutex<mpsc::Receiver<Connection>>,
    shutdown_tx: mpsc::Sender<()>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind a UDP socket on `addr` and listen for CurveCP on it.
    pub async fn listen<A: ToSocketAddrs>(addr: A, long_term_key: [u8; 32]) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;
        Self::listen_on(sock, long_term_key)
    }

    /// Listen for CurveCP on an existing socket, taking exclusive ownership.
    ///
    /// The typical use is running a NAT-traversal exchange on the socket
    /// first and then letting CurveCP take over.
    pub fn listen_on(sock: UdpSocket, long_term_key: [u8; 32]) -> Result<Self> {
        Self::with_rotation(sock, long_term_key, DEFAULT_ROTATION)
    }

    /// [`Listener::listen_on`] with a custom minute-key rotation period.
    pub fn with_rotation(
        sock: UdpSocket,
        long_term_key: [u8; 32],
        rotation: Duration,
    ) -> Result<Self> {
        let local_addr = sock.local_addr()?;
        let sock = Arc::new(sock);

        let (packet_tx, packet_rx) = mpsc::channel(64);
        let (accept_tx, accept_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(16);

        tokio::spawn(read_loop(sock.clone(), packet_tx));
        let pump = Pump {
            sock,
            local_addr,
            long_term: SecretKey::from(long_term_key),
            minute: MinuteKey::random(),
            prev_minute: MinuteKey::random(),
            accepting: true,
            keys_cleared: false,
            conns: HashMap::new(),
            accept_tx: Some(accept_tx),
            done_tx,
            rotation,
        };
        tokio::spawn(pump.run(packet_rx, shutdown_rx, done_rx));

        info!(%local_addr, "curvecp listener started");
        Ok(Self {
            accept_rx: Mutex::new(accept_rx),
            shutdown_tx,
            local_addr,
        })
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&self) -> Result<Connection> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::ListenerClosed)
    }

    /// Stop admitting new flows. Established connections keep running until
    /// they terminate on their own.
    pub fn close(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Pull datagrams off the socket into pooled buffers. A read error is
/// fatal: the loop exits and the pump detaches every connection.
async fn read_loop(sock: Arc<UdpSocket>, packet_tx: mpsc::Sender<Datagram>) {
    loop {
        let mut buf = pool::packets().acquire();
        match sock.recv_from(&mut buf).await {
            Ok((n, addr)) => {
                if n < packet::MIN_DATAGRAM {
                    pool::packets().release(buf);
                    continue;
                }
                buf.truncate(n);
                if let Err(failed) = packet_tx.send(Datagram { addr, buf }).await {
                    pool::packets().release(failed.0.buf);
                    return;
                }
            }
            Err(err) => {
                warn!(%err, "socket read failed, read loop stopping");
                return;
            }
        }
    }
}

struct Pump {
    sock: Arc<UdpSocket>,
    local_addr: SocketAddr,
    long_term: SecretKey,
    minute: MinuteKey,
    prev_minute: MinuteKey,
    accepting: bool,
    keys_cleared: bool,
    /// Inbound channel per live flow, keyed by client short-term public key.
    /// An entry exists exactly while the flow's pump runs.
    conns: HashMap<[u8; 32], mpsc::Sender<Inbound>>,
    accept_tx: Option<mpsc::Sender<Connection>>,
    done_tx: mpsc::Sender<[u8; 32]>,
    rotation: Duration,
}

impl Pump {
    async fn run(
        mut self,
        mut packet_rx: mpsc::Receiver<Datagram>,
        mut shutdown_rx: mpsc::Receiver<()>,
        mut done_rx: mpsc::Receiver<[u8; 32]>,
    ) {
        let mut rotation = time::interval_at(Instant::now() + self.rotation, self.rotation);
        let mut socket_down = false;

        loop {
            tokio::select! {
                maybe = packet_rx.recv(), if !socket_down => match maybe {
                    Some(datagram) => self.ingest(datagram).await,
                    None => {
                        // Fatal socket error: stop admitting flows and drop
                        // every inbound channel so connections observe it.
                        socket_down = true;
                        self.accepting = false;
                        self.accept_tx = None;
                        self.conns.clear();
                    }
                },
                Some(key) = done_rx.recv() => {
                    self.conns.remove(&key);
                    debug!("connection deregistered");
                }
                _ = shutdown_rx.recv(), if self.accepting => {
                    debug!("listener closing");
                    self.accepting = false;
                    self.accept_tx = None;
                }
                _ = rotation.tick() => self.rotate(),
            }

            if self.keys_cleared && self.conns.is_empty() {
                break;
            }
        }
        debug!("listener pump exiting");
    }

    async fn ingest(&mut self, d: Datagram) {
        match packet::classify(&d.buf) {
            Some(Kind::Hello) if self.accepting => {
                if hello::verify(&d.buf, &self.long_term).is_ok() {
                    if let Ok(reply) = cookie::build(&d.buf, &self.long_term, &self.minute) {
                        let _ = self.sock.send_to(&reply, d.addr).await;
                    }
                }
                pool::packets().release(d.buf);
            }
            Some(Kind::Initiate) => self.ingest_initiate(d).await,
            Some(Kind::Message) => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&d.buf[packet::CLIENT_SHORT_PK]);
                match self.conns.get(&key) {
                    Some(tx) => forward(tx, Inbound::Message(d)).await,
                    None => pool::packets().release(d.buf),
                }
            }
            _ => pool::packets().release(d.buf),
        }
    }

    async fn ingest_initiate(&mut self, mut d: Datagram) {
        let summary = match initiate::verify_in_place(
            &mut d.buf,
            &self.long_term,
            &self.minute,
            &self.prev_minute,
        ) {
            Ok(summary) => summary,
            Err(_) => {
                pool::packets().release(d.buf);
                return;
            }
        };

        let key = *summary.client_short_pk.as_bytes();
        if let Some(tx) = self.conns.get(&key) {
            // A retransmit for an established flow. The box is already
            // replaced with plaintext, so the connection does no crypto.
            forward(tx, Inbound::Initiate(d)).await;
            return;
        }
        if !self.accepting {
            pool::packets().release(d.buf);
            return;
        }
        let Some(accept_tx) = self.accept_tx.clone() else {
            pool::packets().release(d.buf);
            return;
        };

        let mut client_ext = [0u8; 16];
        client_ext.copy_from_slice(&d.buf[packet::CLIENT_EXTENSION]);
        let mut server_ext = [0u8; 16];
        server_ext.copy_from_slice(&d.buf[packet::SERVER_EXTENSION]);

        info!(peer = %d.addr, domain = %summary.domain, "connection accepted");
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let conn = connection::spawn(connection::Params {
            sock: self.sock.clone(),
            local_addr: self.local_addr,
            peer_addr: d.addr,
            summary,
            client_ext,
            server_ext,
            inbound_rx,
            done_tx: self.done_tx.clone(),
        });

        if accept_tx.send(conn).await.is_err() {
            // Nobody is accepting anymore; abandon the flow. Dropping
            // inbound_tx ends the connection pump we just spawned.
            pool::packets().release(d.buf);
            return;
        }
        // Deliver the Initiate itself so its embedded message is not lost.
        forward(&inbound_tx, Inbound::Initiate(d)).await;
        self.conns.insert(key, inbound_tx);
    }

    fn rotate(&mut self) {
        if self.keys_cleared {
            return;
        }
        if !self.accepting && self.minute == self.prev_minute {
            // Closed for at least one full rotation: wipe all long-lived
            // secret material. Retransmitted Initiates stop opening here.
            self.minute = MinuteKey::from_bytes([0u8; 32]);
            self.prev_minute = MinuteKey::from_bytes([0u8; 32]);
            self.long_term = SecretKey::from([0u8; 32]);
            self.keys_cleared = true;
            debug!("handshake keys cleared");
        } else {
            self.prev_minute = self.minute.clone();
            if self.accepting {
                self.minute = MinuteKey::random();
            }
            debug!("minute key rotated");
        }
    }
}

/// Hand a packet to a connection, reclaiming the buffer if the pump is
/// already gone.
async fn forward(tx: &mpsc::Sender<Inbound>, inbound: Inbound) {
    if let Err(failed) = tx.send(inbound).await {
        let (Inbound::Initiate(d) | Inbound::Message(d)) = failed.0;
        pool::packets().release(d.buf);
    }
}
