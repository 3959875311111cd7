//! Logging setup.
//!
//! Lifecycle events (listen, accept, rotation, shutdown) are traced;
//! dropped packets are not, by design: an unauthenticated datagram produces
//! no observable reaction of any kind.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. The `RUST_LOG` environment
/// variable overrides the configured filter.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
