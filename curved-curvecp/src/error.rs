//! Packet rejection reasons.
//!
//! Every variant maps to the same external behavior: the datagram is
//! dropped without a response and without logging. The typed reasons exist
//! for tests and for internal control flow, not for the peer.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Wrong length, wrong magic, or a fixed region that fails its layout
    /// requirement.
    #[error("truncated or malformed packet")]
    Malformed,

    /// A box or secretbox failed to open, or sealing failed.
    #[error("crypto operation failed")]
    Crypto,

    /// The cookie opened, but the client short-term key inside it does not
    /// match the key asserted in the packet.
    #[error("cookie does not match asserted client key")]
    CookieMismatch,

    /// The vouch opened, but endorses a different short-term key than the
    /// packet asserts.
    #[error("vouch does not match asserted client key")]
    VouchMismatch,

    /// The domain region is not a valid label sequence.
    #[error("invalid domain name encoding")]
    Domain,
}
