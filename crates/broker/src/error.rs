//! Error taxonomy for broker connections.
//!
//! Only `ConnectError` ever reaches the user; publish and teardown failures
//! are logged and swallowed so transport hiccups never interrupt a terminal
//! session.

use thiserror::Error;

/// Synchronous connect-time failure, surfaced to the caller of `configure`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("broker address is empty")]
    EmptyAddress,

    #[error("broker port must be non-zero")]
    InvalidPort,

    #[error("no publish or subscribe topic supplied")]
    NoTopics,

    #[error("session is not open")]
    SessionClosed,

    #[error("could not reach broker: {0}")]
    Transport(String),

    #[error("subscribe to '{topic}' was rejected: {reason}")]
    SubscribeRejected { topic: String, reason: String },
}

/// Transient publish failure. Always logged, never propagated.
#[derive(Debug, Error)]
#[error("publish to '{topic}' failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Failure of one teardown step. Teardown runs every step regardless and
/// collects these for logging.
#[derive(Debug, Error)]
#[error("teardown step '{step}' failed: {reason}")]
pub struct TeardownError {
    pub step: &'static str,
    pub reason: String,
}

impl TeardownError {
    pub fn new(step: &'static str, reason: impl ToString) -> Self {
        Self {
            step,
            reason: reason.to_string(),
        }
    }
}
