//! # curved: a CurveCP server
//!
//! `curved` accepts CurveCP flows over a UDP socket and presents each one as
//! an ordered, reliable byte stream. The cryptographic and wire-format state
//! machine lives in the `curved-curvecp` crate; this crate owns the socket,
//! the event loops and the user-facing API.
//!
//! ## Architecture
//!
//! One task owns each piece of mutable state and everything moves over
//! typed channels:
//!
//! ```text
//! read loop ──packets──> listener pump ──per-flow packets──> connection pump
//!                          │    ▲                              │      ▲
//!                       accept  └── connection end signals ────┘      │
//!                          ▼                                          │
//!                     Listener::accept()          Connection::read/write
//! ```
//!
//! The listener pump performs all handshake cryptography, answers Hellos
//! with Cookies (holding no state), and admits a flow only when its
//! Initiate authenticates. Each connection pump multiplexes inbound
//! messages, user I/O offers, the transmit throttle and the retransmit
//! timer, all paced by the Chicago scheduler.
//!
//! Datagram buffers come from a fixed-size pool and move linearly:
//! read loop, listener, optionally a connection, then back to the pool.

pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod pool;
pub mod telemetry;

pub use connection::Connection;
pub use error::{Error, Result};
pub use listener::Listener;
