//! Cookie construction.
//!
//! The Cookie is the stateless half of the handshake. It carries a fresh
//! server short-term public key toward the client and, sealed under the
//! minute key, the pair `(client short pk, server short sk)` that the server
//! will need back when the Initiate arrives. The server holds on to nothing:
//! the flow's entire state rides in the cookie through the client.

use crate::crypto::{self, key32, MinuteKey, KEY_LEN};
use crate::error::PacketError;
use crate::packet::{CLIENT_EXTENSION, CLIENT_SHORT_PK, COOKIE_MAGIC, SERVER_EXTENSION};
use crypto_box::{
    aead::Aead,
    PublicKey, SalsaBox, SecretKey,
};
use rand_core::OsRng;

pub const LEN: usize = 200;

const NONCE_TAIL: core::ops::Range<usize> = 40..56;
const BOX: core::ops::Range<usize> = 56..200;

/// Size of the boxed payload: server short pk, minute nonce tail, and the
/// 80-byte minute-key secretbox.
const PAYLOAD_LEN: usize = 32 + 16 + 80;

/// Build the 200-byte Cookie response to a verified Hello.
///
/// Generates a fresh server short-term key pair; the secret half survives
/// only inside the minute-key secretbox. The Hello's extensions come back
/// swapped, as the client expects them.
pub fn build(
    hello: &[u8],
    long_term: &SecretKey,
    minute: &MinuteKey,
) -> Result<Vec<u8>, PacketError> {
    let client_pk = PublicKey::from(key32(&hello[CLIENT_SHORT_PK]));
    let server_sk = SecretKey::generate(&mut OsRng);
    let server_pk = server_sk.public_key();

    // The pair the Initiate must hand back: client short pk, server short sk.
    let mut pair = [0u8; 2 * KEY_LEN];
    pair[..KEY_LEN].copy_from_slice(client_pk.as_bytes());
    pair[KEY_LEN..].copy_from_slice(&server_sk.to_bytes());

    let minute_tail = crypto::random_bytes::<16>();
    let sealed_pair = minute.seal(&minute_tail, &pair)?;

    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..32].copy_from_slice(server_pk.as_bytes());
    payload[32..48].copy_from_slice(&minute_tail);
    payload[48..].copy_from_slice(&sealed_pair);

    let cookie_tail = crypto::random_bytes::<16>();
    let nonce = crypto::nonce(crypto::COOKIE_NONCE_PREFIX, &cookie_tail);
    let boxed = SalsaBox::new(&client_pk, long_term)
        .encrypt(&nonce.into(), &payload[..])
        .map_err(|_| PacketError::Crypto)?;

    let mut pb = vec![0u8; LEN];
    pb[..8].copy_from_slice(COOKIE_MAGIC);
    // Extensions swap direction on the way back.
    pb[8..24].copy_from_slice(&hello[CLIENT_EXTENSION]);
    pb[24..40].copy_from_slice(&hello[SERVER_EXTENSION]);
    pb[NONCE_TAIL].copy_from_slice(&cookie_tail);
    pb[BOX].copy_from_slice(&boxed);
    Ok(pb)
}
