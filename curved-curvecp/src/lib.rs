//! # curved-curvecp: CurveCP Protocol State Machine
//!
//! This crate implements the server half of the CurveCP protocol as a pure
//! state machine: it parses and authenticates packets, builds replies, and
//! schedules transmissions, but performs no I/O of its own. The companion
//! `curved` crate supplies the UDP socket, the event loops and the
//! user-facing stream API.
//!
//! ## Architecture Overview
//!
//! ```text
//! curved-curvecp/
//! ├── error      - Packet rejection reasons (all of them silent drops)
//! ├── crypto     - Key material, nonce construction, minute keys
//! ├── packet     - Wire layouts: Hello, Cookie, Initiate, Message
//! ├── domain     - Length-prefixed domain-name codec
//! ├── chicago    - The Chicago congestion scheduler
//! └── ringbuf    - Fixed-capacity byte ring for the receive side
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure State Machine**: No sockets, no event loops. Functions consume
//!    input bytes and produce output bytes or verdicts.
//!
//! 2. **Stateless Handshake**: A valid Hello produces a Cookie and nothing
//!    else; the ephemeral server key travels back to the server inside the
//!    minute-key-sealed cookie the client echoes in its Initiate. The server
//!    allocates per-flow state only once an Initiate authenticates.
//!
//! 3. **Deterministic**: Time and randomness are injected. The scheduler is
//!    a value type driven by `(sample, now)` pairs, so its cycle behavior is
//!    reproducible under test.
//!
//! 4. **Silent Failure**: Verification failures carry a typed reason for the
//!    caller, but the protocol answer to a bad packet is always the same:
//!    the packet does not exist.

#![forbid(unsafe_code)]

pub mod chicago;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod packet;
pub mod ringbuf;

pub use chicago::Chicago;
pub use crypto::MinuteKey;
pub use error::PacketError;
pub use ringbuf::RingBuf;

// Re-exported so dependents use the same key types without naming the
// underlying crypto crate.
pub use crypto_box::{PublicKey, SalsaBox, SecretKey};
