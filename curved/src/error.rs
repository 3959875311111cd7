//! Errors surfaced to users of the listener and connection APIs.
//!
//! Packet-level failures never appear here: a datagram that fails
//! verification is dropped as if it never arrived.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A read or write did not clear its offer phase before the deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// `accept` after the listener was closed.
    #[error("listener closed")]
    ListenerClosed,

    /// The connection's pump has exited.
    #[error("connection closed")]
    ConnectionClosed,

    /// Surface for operations outside the current core scope.
    #[error("not implemented")]
    NotImplemented,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
