//! Initiate verification.
//!
//! The Initiate closes the handshake. It echoes the minute-key-sealed cookie
//! (handing the server back its own ephemeral secret key), proves possession
//! of the client short-term key by sealing the outer box, and proves the
//! client's long-term identity endorses that short-term key via the vouch
//! box. Any failure at any step is a silent drop.
//!
//! On success the outer box is overwritten in place with its plaintext and
//! the trailing authenticator is zeroed. A connection that later receives a
//! retransmitted, re-verified Initiate reads the plaintext offsets directly
//! and never repeats the decryption.

use crate::crypto::{self, key32, MinuteKey, BOX_OVERHEAD, KEY_LEN};
use crate::domain;
use crate::error::PacketError;
use crate::packet::{CLIENT_SHORT_PK, INITIATE_MAGIC};
use crypto_box::{
    aead::Aead,
    PublicKey, SalsaBox, SecretKey,
};

pub const MIN_LEN: usize = 544;

const COOKIE_NONCE_TAIL: core::ops::Range<usize> = 72..88;
const COOKIE_BOX: core::ops::Range<usize> = 88..168;
const NONCE_TAIL: core::ops::Range<usize> = 168..176;

/// Offset of the outer box; after verification, of its plaintext.
pub const PLAINTEXT_AT: usize = 176;

// Plaintext regions, absolute within the packet, valid after replacement.
const CLIENT_LONG_PK: core::ops::Range<usize> = 176..208;
const VOUCH_NONCE_TAIL: core::ops::Range<usize> = 208..224;
const VOUCH_BOX: core::ops::Range<usize> = 224..272;
const DOMAIN: core::ops::Range<usize> = 272..528;

/// Offset of the message region inside the replaced plaintext.
pub const MESSAGE_AT: usize = 528;

/// Everything the packet pump learns from a valid Initiate.
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Summary {
    pub client_short_pk: PublicKey,
    pub client_long_pk: PublicKey,
    pub server_short_sk: SecretKey,
    pub domain: String,
}

/// Verify an Initiate and replace its outer box with the plaintext.
///
/// The cookie is tried under the current minute key first, then the
/// previous one, giving issued cookies a 30-60 second acceptance window.
/// On any error the packet is left unmodified except possibly the outer box
/// region, and must be dropped by the caller.
pub fn verify_in_place(
    pb: &mut [u8],
    long_term: &SecretKey,
    minute: &MinuteKey,
    prev_minute: &MinuteKey,
) -> Result<Summary, PacketError> {
    if pb.len() < MIN_LEN || &pb[..8] != INITIATE_MAGIC {
        return Err(PacketError::Malformed);
    }

    // Recover (client short pk, server short sk) from the echoed cookie.
    let mut cookie_tail = [0u8; 16];
    cookie_tail.copy_from_slice(&pb[COOKIE_NONCE_TAIL]);
    let pair = match minute.open(&cookie_tail, &pb[COOKIE_BOX]) {
        Ok(pair) => pair,
        Err(_) => prev_minute.open(&cookie_tail, &pb[COOKIE_BOX])?,
    };

    if pair[..KEY_LEN] != pb[CLIENT_SHORT_PK] {
        return Err(PacketError::CookieMismatch);
    }
    let client_short_pk = PublicKey::from(key32(&pb[CLIENT_SHORT_PK]));
    let server_short_sk = SecretKey::from(key32(&pair[KEY_LEN..]));

    // Open the outer box under the two short-term keys.
    let nonce = crypto::nonce(crypto::INITIATE_NONCE_PREFIX, &pb[NONCE_TAIL]);
    let plaintext = SalsaBox::new(&client_short_pk, &server_short_sk)
        .decrypt(&nonce.into(), &pb[PLAINTEXT_AT..])
        .map_err(|_| PacketError::Crypto)?;

    // The vouch proves the long-term key endorses the short-term key.
    let client_long_pk = PublicKey::from(key32(&plaintext[..KEY_LEN]));
    let vouch_nonce = crypto::nonce(crypto::VOUCH_NONCE_PREFIX, &plaintext[32..48]);
    let vouched = SalsaBox::new(&client_long_pk, long_term)
        .decrypt(&vouch_nonce.into(), &plaintext[48..96])
        .map_err(|_| PacketError::Crypto)?;
    if vouched[..] != pb[CLIENT_SHORT_PK] {
        return Err(PacketError::VouchMismatch);
    }

    // Replace the box with its plaintext; zero the former authenticator.
    let end = PLAINTEXT_AT + plaintext.len();
    pb[PLAINTEXT_AT..end].copy_from_slice(&plaintext);
    pb[end..].fill(0);

    let domain = domain::decode(&pb[DOMAIN])?;

    Ok(Summary {
        client_short_pk,
        client_long_pk,
        server_short_sk,
        domain,
    })
}

/// The message region of a verified, replaced Initiate. Empty when the
/// client sent no payload.
pub fn plaintext_message(pb: &[u8]) -> &[u8] {
    &pb[MESSAGE_AT..pb.len() - BOX_OVERHEAD]
}
