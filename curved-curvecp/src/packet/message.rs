//! Message packet sealing and opening.
//!
//! After the handshake, both directions carry one boxed message child per
//! datagram under the precomputed short-term shared key. The 8-byte
//! compressed nonce is a little-endian counter: senders start at one and
//! strictly increase, receivers refuse to step backwards. Direction is
//! distinguished by magic and nonce prefix, so a reflected packet can never
//! open.

use crate::crypto::{self, BOX_OVERHEAD};
use crate::error::PacketError;
use crate::packet::{
    CLIENT_EXTENSION, CLIENT_MESSAGE_MAGIC, CLIENT_SHORT_PK, SERVER_EXTENSION,
    SERVER_MESSAGE_MAGIC,
};
use crypto_box::{aead::Aead, PublicKey, SalsaBox};

/// Bytes a client Message adds around its payload.
pub const CLIENT_OVERHEAD: usize = 80 + BOX_OVERHEAD;

/// Bytes a server Message adds around its payload.
pub const SERVER_OVERHEAD: usize = 48 + BOX_OVERHEAD;

const CLIENT_NONCE_TAIL: core::ops::Range<usize> = 72..80;
const CLIENT_BOX_AT: usize = 80;

const SERVER_NONCE_TAIL: core::ops::Range<usize> = 40..48;
const SERVER_BOX_AT: usize = 48;

/// Seal a server-to-client Message around `payload`.
pub fn seal_server(
    shared: &SalsaBox,
    client_ext: &[u8; 16],
    server_ext: &[u8; 16],
    nonce: u64,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let tail = nonce.to_le_bytes();
    let full = crypto::nonce(crypto::SERVER_MESSAGE_NONCE_PREFIX, &tail);
    let boxed = shared
        .encrypt(&full.into(), payload)
        .map_err(|_| PacketError::Crypto)?;

    let mut pb = vec![0u8; SERVER_BOX_AT + boxed.len()];
    pb[..8].copy_from_slice(SERVER_MESSAGE_MAGIC);
    pb[8..24].copy_from_slice(client_ext);
    pb[24..40].copy_from_slice(server_ext);
    pb[SERVER_NONCE_TAIL].copy_from_slice(&tail);
    pb[SERVER_BOX_AT..].copy_from_slice(&boxed);
    Ok(pb)
}

/// Open a client-to-server Message. Returns the nonce counter and payload;
/// the caller enforces nonce monotonicity.
pub fn open_client(shared: &SalsaBox, pb: &[u8]) -> Result<(u64, Vec<u8>), PacketError> {
    if pb.len() < CLIENT_OVERHEAD || &pb[..8] != CLIENT_MESSAGE_MAGIC {
        return Err(PacketError::Malformed);
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&pb[CLIENT_NONCE_TAIL]);
    let full = crypto::nonce(crypto::CLIENT_MESSAGE_NONCE_PREFIX, &tail);
    let payload = shared
        .decrypt(&full.into(), &pb[CLIENT_BOX_AT..])
        .map_err(|_| PacketError::Crypto)?;
    Ok((u64::from_le_bytes(tail), payload))
}

/// Seal a client-to-server Message. The server never sends these; clients
/// and tests do.
pub fn seal_client(
    shared: &SalsaBox,
    server_ext: &[u8; 16],
    client_ext: &[u8; 16],
    client_short_pk: &PublicKey,
    nonce: u64,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let tail = nonce.to_le_bytes();
    let full = crypto::nonce(crypto::CLIENT_MESSAGE_NONCE_PREFIX, &tail);
    let boxed = shared
        .encrypt(&full.into(), payload)
        .map_err(|_| PacketError::Crypto)?;

    let mut pb = vec![0u8; CLIENT_BOX_AT + boxed.len()];
    pb[..8].copy_from_slice(CLIENT_MESSAGE_MAGIC);
    pb[SERVER_EXTENSION].copy_from_slice(server_ext);
    pb[CLIENT_EXTENSION].copy_from_slice(client_ext);
    pb[CLIENT_SHORT_PK].copy_from_slice(client_short_pk.as_bytes());
    pb[CLIENT_NONCE_TAIL].copy_from_slice(&tail);
    pb[CLIENT_BOX_AT..].copy_from_slice(&boxed);
    Ok(pb)
}

/// Open a server-to-client Message, as a client would.
pub fn open_server(shared: &SalsaBox, pb: &[u8]) -> Result<(u64, Vec<u8>), PacketError> {
    if pb.len() < SERVER_OVERHEAD || &pb[..8] != SERVER_MESSAGE_MAGIC {
        return Err(PacketError::Malformed);
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&pb[SERVER_NONCE_TAIL]);
    let full = crypto::nonce(crypto::SERVER_MESSAGE_NONCE_PREFIX, &tail);
    let payload = shared
        .decrypt(&full.into(), &pb[SERVER_BOX_AT..])
        .map_err(|_| PacketError::Crypto)?;
    Ok((u64::from_le_bytes(tail), payload))
}
