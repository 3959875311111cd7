//! Key material and nonce construction.
//!
//! CurveCP uses three kinds of keys on the server side:
//!
//! - the **long-term** Curve25519 key pair, the server's identity;
//! - a fresh **short-term** key pair per flow, generated on Hello and
//!   carried back to the server inside the cookie;
//! - the symmetric **minute key**, which seals cookies and is rotated every
//!   30 seconds with one rotation of memory.
//!
//! Every 24-byte nonce is a fixed ASCII prefix followed by a tail that
//! travels on the wire (the "compressed" nonce). Random tails come from the
//! OS CSPRNG; Message nonces are counters managed by the connection.

use crate::error::PacketError;
use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, XSalsa20Poly1305,
};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroize;

/// Length of every CurveCP key, public or secret.
pub const KEY_LEN: usize = 32;

/// Poly1305 authenticator length; every box is its plaintext plus this.
pub const BOX_OVERHEAD: usize = 16;

// Nonce prefixes. Prefix plus wire tail always totals 24 bytes.
pub const HELLO_NONCE_PREFIX: &[u8] = b"CurveCP-client-H";
pub const COOKIE_NONCE_PREFIX: &[u8] = b"CurveCPK";
pub const INITIATE_NONCE_PREFIX: &[u8] = b"CurveCP-client-I";
pub const VOUCH_NONCE_PREFIX: &[u8] = b"CurveCPV";
pub const SERVER_MESSAGE_NONCE_PREFIX: &[u8] = b"CurveCP-server-M";
pub const CLIENT_MESSAGE_NONCE_PREFIX: &[u8] = b"CurveCP-client-M";
pub const MINUTE_NONCE_PREFIX: &[u8] = b"minute-k";

/// Assemble a full 24-byte nonce from an ASCII prefix and a wire tail.
pub fn nonce(prefix: &[u8], tail: &[u8]) -> [u8; 24] {
    debug_assert_eq!(prefix.len() + tail.len(), 24);
    let mut n = [0u8; 24];
    n[..prefix.len()].copy_from_slice(prefix);
    n[prefix.len()..prefix.len() + tail.len()].copy_from_slice(tail);
    n
}

/// Fresh random bytes from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut b = [0u8; N];
    OsRng.fill_bytes(&mut b);
    b
}

/// Copy a 32-byte region out of a packet. Callers index with the fixed
/// offsets from [`crate::packet`], so the length always matches.
pub(crate) fn key32(bytes: &[u8]) -> [u8; KEY_LEN] {
    let mut k = [0u8; KEY_LEN];
    k.copy_from_slice(bytes);
    k
}

/// A symmetric cookie-sealing key with a 30-second lifetime.
///
/// The listener holds two of these, *current* and *previous*; rotation
/// copies current into previous and draws a fresh current. The key is wiped
/// when dropped and can be compared to detect the already-rotated-out state
/// during shutdown.
#[derive(Clone)]
pub struct MinuteKey([u8; KEY_LEN]);

impl MinuteKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Seal `plaintext` under this key with nonce `"minute-k" ‖ tail`.
    pub fn seal(&self, tail: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>, PacketError> {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .encrypt(&nonce(MINUTE_NONCE_PREFIX, tail).into(), plaintext)
            .map_err(|_| PacketError::Crypto)
    }

    /// Open a secretbox sealed with [`MinuteKey::seal`].
    pub fn open(&self, tail: &[u8; 16], sealed: &[u8]) -> Result<Vec<u8>, PacketError> {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(&nonce(MINUTE_NONCE_PREFIX, tail).into(), sealed)
            .map_err(|_| PacketError::Crypto)
    }
}

impl PartialEq for MinuteKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MinuteKey {}

impl Drop for MinuteKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for MinuteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MinuteKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_prefix_then_tail() {
        let n = nonce(MINUTE_NONCE_PREFIX, &[7u8; 16]);
        assert_eq!(&n[..8], b"minute-k");
        assert_eq!(&n[8..], &[7u8; 16]);
    }

    #[test]
    fn minute_key_seal_open_roundtrip() {
        let key = MinuteKey::random();
        let tail = random_bytes::<16>();
        let sealed = key.seal(&tail, b"sixty-four bytes of payload").unwrap();
        assert_eq!(sealed.len(), b"sixty-four bytes of payload".len() + BOX_OVERHEAD);
        let opened = key.open(&tail, &sealed).unwrap();
        assert_eq!(opened, b"sixty-four bytes of payload");
    }

    #[test]
    fn minute_key_open_rejects_other_key() {
        let key = MinuteKey::random();
        let other = MinuteKey::random();
        let tail = random_bytes::<16>();
        let sealed = key.seal(&tail, &[0u8; 64]).unwrap();
        assert_eq!(other.open(&tail, &sealed), Err(PacketError::Crypto));
    }

    #[test]
    fn minute_key_open_rejects_wrong_tail() {
        let key = MinuteKey::random();
        let sealed = key.seal(&[1u8; 16], &[0u8; 64]).unwrap();
        assert_eq!(key.open(&[2u8; 16], &sealed), Err(PacketError::Crypto));
    }
}
