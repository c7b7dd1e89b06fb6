//! Session-Connection Registry.
//!
//! Maps stable terminal session identity to one live broker connection plus
//! its per-connection state (topics, output cursor, watch binding). Owns
//! creation, rebinding, and teardown of connections as sessions are created,
//! re-pointed, split, or destroyed. Runs entirely on the UI context; broker
//! callbacks reach it as queued `BrokerEvent`s.

mod record;
mod registry;

#[cfg(test)]
mod registry_tests;

pub use record::{ConnectionInfo, ConnectionRecord};
pub use registry::ConnectionRegistry;
