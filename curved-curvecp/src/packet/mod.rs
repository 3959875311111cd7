//! CurveCP wire formats.
//!
//! Every CurveCP datagram fits in 1280 bytes (the minimum IPv6 MTU) and
//! starts with an 8-byte ASCII magic. All offsets below are in bytes from
//! the start of the datagram.
//!
//! ```text
//! HELLO (224 bytes)
//! 0   : 8  : magic "QvnQ5XlH"
//! 8   : 16 : server extension
//! 24  : 16 : client extension
//! 40  : 32 : client short-term public key
//! 72  : 64 : zero padding
//! 136 : 8  : compressed nonce
//! 144 : 80 : box C'->S containing 64 zero bytes
//!
//! COOKIE (200 bytes)
//! 0   : 8   : magic "RL3aNMXK"
//! 8   : 16  : client extension
//! 24  : 16  : server extension
//! 40  : 16  : compressed nonce
//! 56  : 144 : box S->C' containing:
//!              0  : 32 : server short-term public key
//!              32 : 16 : compressed minute nonce
//!              48 : 80 : minute-key secretbox containing:
//!                         0  : 32 : client short-term public key
//!                         32 : 32 : server short-term secret key
//!
//! INITIATE (544+M bytes)
//! 0   : 8     : magic "QvnQ5XlI"
//! 8   : 16    : server extension
//! 24  : 16    : client extension
//! 40  : 32    : client short-term public key
//! 72  : 16    : compressed minute nonce (echo of the cookie's)
//! 88  : 80    : minute-key secretbox (echo of the cookie's)
//! 168 : 8     : compressed nonce
//! 176 : 368+M : box C'->S' containing:
//!                0   : 32  : client long-term public key
//!                32  : 16  : compressed vouch nonce
//!                48  : 48  : vouch box C->S containing the client
//!                            short-term public key
//!                96  : 256 : server domain name
//!                352 : M   : message
//!
//! CLIENT MESSAGE (96+M bytes)
//! 0   : 8    : magic "QvnQ5XlM"
//! 8   : 16   : server extension
//! 24  : 16   : client extension
//! 40  : 32   : client short-term public key
//! 72  : 8    : compressed nonce
//! 80  : 16+M : box C'->S' containing the message
//!
//! SERVER MESSAGE (64+M bytes)
//! 0   : 8    : magic "RL3aNMXM"
//! 8   : 16   : client extension
//! 24  : 16   : server extension
//! 40  : 8    : compressed nonce
//! 48  : 16+M : box S'->C' containing the message
//! ```
//!
//! Once an Initiate passes verification in the packet pump, the C'->S' box
//! is overwritten with its plaintext and the trailing authenticator is
//! zeroed, so a connection handling a retransmitted Initiate never repeats
//! the decryption. The absolute offsets for the box contents (declared in
//! [`initiate`]) are only meaningful after that replacement.

pub mod child;
pub mod cookie;
pub mod hello;
pub mod initiate;
pub mod message;

/// CurveCP datagrams always fit the smallest IPv6 MTU.
pub const MAX_DATAGRAM: usize = 1280;

/// Anything shorter cannot be any CurveCP packet.
pub const MIN_DATAGRAM: usize = 64;

pub const HELLO_MAGIC: &[u8; 8] = b"QvnQ5XlH";
pub const COOKIE_MAGIC: &[u8; 8] = b"RL3aNMXK";
pub const INITIATE_MAGIC: &[u8; 8] = b"QvnQ5XlI";
pub const CLIENT_MESSAGE_MAGIC: &[u8; 8] = b"QvnQ5XlM";
pub const SERVER_MESSAGE_MAGIC: &[u8; 8] = b"RL3aNMXM";

// Shared header offsets for client-to-server packets.
pub const SERVER_EXTENSION: core::ops::Range<usize> = 8..24;
pub const CLIENT_EXTENSION: core::ops::Range<usize> = 24..40;
pub const CLIENT_SHORT_PK: core::ops::Range<usize> = 40..72;

/// Packet categories a server can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Hello,
    Initiate,
    Message,
}

/// Cheap classification by magic. Returns `None` for runts and unknown
/// magics; full verification happens per kind.
pub fn classify(pb: &[u8]) -> Option<Kind> {
    if pb.len() < MIN_DATAGRAM {
        return None;
    }
    // Message first: by far the most common once flows are established.
    match &pb[..8] {
        m if m == CLIENT_MESSAGE_MAGIC => Some(Kind::Message),
        m if m == HELLO_MAGIC => Some(Kind::Hello),
        m if m == INITIATE_MAGIC => Some(Kind::Initiate),
        _ => None,
    }
}
