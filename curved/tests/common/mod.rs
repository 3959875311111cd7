//! A minimal CurveCP client for exercising the server: just enough of the
//! client half of the handshake and the message layer, built directly on the
//! protocol crate's codecs.

#![allow(dead_code)]

use crypto_box::{aead::Aead, PublicKey, SalsaBox, SecretKey};
use curved::Listener;
use curved_curvecp::packet::{self, child::Child, initiate, message};
use curved_curvecp::{crypto, domain};
use rand_core::OsRng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Start a listener on a loopback socket with the given rotation period.
/// Returns the listener, its address and the server's long-term public key.
pub async fn start_server(rotation: Duration) -> (Listener, SocketAddr, PublicKey) {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::with_rotation(sock, secret.to_bytes(), rotation).unwrap();
    let addr = listener.local_addr();
    (listener, addr, public)
}

pub struct TestClient {
    pub sock: UdpSocket,
    pub server_pk: PublicKey,
    pub long_sk: SecretKey,
    pub short_sk: SecretKey,
    cookie_payload: Option<Vec<u8>>,
    shared: Option<SalsaBox>,
    send_nonce: u64,
}

impl TestClient {
    pub async fn connect(server: SocketAddr, server_pk: PublicKey) -> Self {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(server).await.unwrap();
        Self {
            sock,
            server_pk,
            long_sk: SecretKey::generate(&mut OsRng),
            short_sk: SecretKey::generate(&mut OsRng),
            cookie_payload: None,
            shared: None,
            send_nonce: 0,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.sock.local_addr().unwrap()
    }

    pub async fn send(&self, pb: &[u8]) {
        self.sock.send(pb).await.unwrap();
    }

    /// Next datagram from the server, or `None` on timeout.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.recv_within(RECV_TIMEOUT).await
    }

    pub async fn recv_within(&self, limit: Duration) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; packet::MAX_DATAGRAM];
        match timeout(limit, self.sock.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Some(buf)
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    pub fn hello(&self) -> Vec<u8> {
        let mut pb = vec![0u8; 224];
        pb[..8].copy_from_slice(packet::HELLO_MAGIC);
        pb[packet::CLIENT_SHORT_PK].copy_from_slice(self.short_sk.public_key().as_bytes());
        let tail = crypto::random_bytes::<8>();
        pb[136..144].copy_from_slice(&tail);
        let nonce = crypto::nonce(crypto::HELLO_NONCE_PREFIX, &tail);
        let sealed = SalsaBox::new(&self.server_pk, &self.short_sk)
            .encrypt(&nonce.into(), &[0u8; 64][..])
            .unwrap();
        pb[144..224].copy_from_slice(&sealed);
        pb
    }

    /// Open a Cookie packet, remembering its payload and deriving the
    /// short-term shared key. Returns the 128-byte boxed payload.
    pub fn open_cookie(&mut self, pb: &[u8]) -> Vec<u8> {
        assert_eq!(pb.len(), 200, "cookie packets are exactly 200 bytes");
        assert_eq!(&pb[..8], packet::COOKIE_MAGIC);
        let nonce = crypto::nonce(crypto::COOKIE_NONCE_PREFIX, &pb[40..56]);
        let payload = SalsaBox::new(&self.server_pk, &self.short_sk)
            .decrypt(&nonce.into(), &pb[56..200])
            .expect("cookie box must open under the client short-term key");

        let server_short_pk = PublicKey::from(array32(&payload[..32]));
        self.shared = Some(SalsaBox::new(&server_short_pk, &self.short_sk));
        self.cookie_payload = Some(payload.clone());
        payload
    }

    pub fn initiate(&self, domain_name: &str, message: &[u8]) -> Vec<u8> {
        let mut region = [0u8; domain::DOMAIN_LEN];
        domain::encode(domain_name, &mut region).unwrap();
        self.initiate_with_domain_region(region, message)
    }

    /// Build an Initiate with a raw domain region, valid or not.
    pub fn initiate_with_domain_region(
        &self,
        region: [u8; domain::DOMAIN_LEN],
        message: &[u8],
    ) -> Vec<u8> {
        let payload = self.cookie_payload.as_ref().expect("no cookie opened yet");
        let server_short_pk = PublicKey::from(array32(&payload[..32]));

        let vouch_tail = crypto::random_bytes::<16>();
        let vouch_nonce = crypto::nonce(crypto::VOUCH_NONCE_PREFIX, &vouch_tail);
        let vouch = SalsaBox::new(&self.server_pk, &self.long_sk)
            .encrypt(
                &vouch_nonce.into(),
                self.short_sk.public_key().as_bytes().as_slice(),
            )
            .unwrap();

        let mut inner = Vec::with_capacity(352 + message.len());
        inner.extend_from_slice(self.long_sk.public_key().as_bytes());
        inner.extend_from_slice(&vouch_tail);
        inner.extend_from_slice(&vouch);
        inner.extend_from_slice(&region);
        inner.extend_from_slice(message);

        let tail = crypto::random_bytes::<8>();
        let nonce = crypto::nonce(crypto::INITIATE_NONCE_PREFIX, &tail);
        let boxed = SalsaBox::new(&server_short_pk, &self.short_sk)
            .encrypt(&nonce.into(), inner.as_slice())
            .unwrap();

        let mut pb = vec![0u8; initiate::PLAINTEXT_AT + boxed.len()];
        pb[..8].copy_from_slice(packet::INITIATE_MAGIC);
        pb[packet::CLIENT_SHORT_PK].copy_from_slice(self.short_sk.public_key().as_bytes());
        pb[72..88].copy_from_slice(&payload[32..48]);
        pb[88..168].copy_from_slice(&payload[48..128]);
        pb[168..176].copy_from_slice(&tail);
        pb[initiate::PLAINTEXT_AT..].copy_from_slice(&boxed);
        pb
    }

    /// Hello, Cookie, Initiate. Returns the Initiate for replay tests.
    pub async fn handshake(&mut self, domain_name: &str, message: &[u8]) -> Vec<u8> {
        self.send(&self.hello()).await;
        let cookie = self.recv().await.expect("no cookie from server");
        self.open_cookie(&cookie);
        let init = self.initiate(domain_name, message);
        self.send(&init).await;
        init
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn seal_message(&mut self, child: &Child<'_>) -> Vec<u8> {
        self.send_nonce += 1;
        message::seal_client(
            self.shared.as_ref().expect("handshake not complete"),
            &[0u8; 16],
            &[0u8; 16],
            &self.short_sk.public_key(),
            self.send_nonce,
            &child.encode(),
        )
        .unwrap()
    }

    pub fn open_server_message(&self, pb: &[u8]) -> (u64, Vec<u8>) {
        message::open_server(self.shared.as_ref().expect("handshake not complete"), pb)
            .expect("server message must open under the shared key")
    }

    /// Receive one server Message and decode its child.
    pub async fn recv_payload(&self) -> Option<Vec<u8>> {
        let pb = self.recv().await?;
        Some(self.open_server_message(&pb).1)
    }
}

pub fn array32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    out
}
