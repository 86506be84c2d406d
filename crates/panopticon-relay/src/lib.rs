//! # panopticon-relay
//!
//! Real-time relay for Panopticon direct messages. Every message between two
//! users is mirrored to superadmin monitors, shadow-banned senders get a
//! convincing fake acknowledgment, and deletions are soft and audited.
//!
//! The binary in `main.rs` only wires configuration and the listener; all
//! behavior lives in these modules so integration tests can drive it.

pub mod admin;
pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod deletion;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

pub use relay::{RelayState, Session};

/// Install the `tracing` subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
