//! Hello verification.
//!
//! A Hello proves nothing about the client's identity; it only demonstrates
//! that the sender knows the server's long-term public key and possesses the
//! short-term secret key matching the one it asserts. The server keeps no
//! state for it: the only response is a Cookie.

use crate::crypto::{self, key32};
use crate::error::PacketError;
use crate::packet::{CLIENT_SHORT_PK, HELLO_MAGIC};
use crypto_box::{
    aead::Aead,
    PublicKey, SalsaBox, SecretKey,
};

pub const LEN: usize = 224;

const PADDING: core::ops::Range<usize> = 72..136;
const NONCE_TAIL: core::ops::Range<usize> = 136..144;
const BOX: core::ops::Range<usize> = 144..224;

/// Verify a Hello. Returns the client's short-term public key.
///
/// Checks, in order: exact length, magic, zero padding, and that the
/// 80-byte box opens under `(client short pk, server long sk)` with nonce
/// `"CurveCP-client-H" ‖ tail`. The plaintext is 64 zero bytes by
/// construction, so opening the box is the whole proof.
pub fn verify(pb: &[u8], long_term: &SecretKey) -> Result<PublicKey, PacketError> {
    if pb.len() != LEN || &pb[..8] != HELLO_MAGIC {
        return Err(PacketError::Malformed);
    }
    if pb[PADDING].iter().any(|&b| b != 0) {
        return Err(PacketError::Malformed);
    }

    let client_pk = PublicKey::from(key32(&pb[CLIENT_SHORT_PK]));
    let nonce = crypto::nonce(crypto::HELLO_NONCE_PREFIX, &pb[NONCE_TAIL]);
    SalsaBox::new(&client_pk, long_term)
        .decrypt(&nonce.into(), &pb[BOX])
        .map_err(|_| PacketError::Crypto)?;

    Ok(client_pk)
}
