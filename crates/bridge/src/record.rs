//! Per-session connection state.

use broker::BrokerConnection;
use session::{CursorPosition, SessionId, SurfaceId};
use std::fmt;

/// State of one live broker connection, keyed by session identity.
///
/// The registry guarantees at most one record per session; the record owns
/// its client handle exclusively, so dropping the record is the last word on
/// the connection.
pub struct ConnectionRecord {
    pub session: SessionId,
    pub broker_host: String,
    pub port: u16,
    pub publish_topic: Option<String>,
    pub subscribe_topic: Option<String>,
    /// Output already published ends here; the next delta starts here.
    pub cursor: CursorPosition,
    /// Surface the output watch is currently bound to. Compared against the
    /// session's active surface to detect replacement.
    pub bound_surface: SurfaceId,
    /// Set once the broker acknowledges the connection (and, for subscribing
    /// records, the subscription). Written only from the UI context, via
    /// queued broker events.
    pub connected: bool,
    pub(crate) client: Box<dyn BrokerConnection>,
}

impl ConnectionRecord {
    /// Cloneable view for status display.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            broker_host: self.broker_host.clone(),
            port: self.port,
            publish_topic: self.publish_topic.clone(),
            subscribe_topic: self.subscribe_topic.clone(),
            cursor: self.cursor,
            connected: self.connected,
        }
    }
}

// Manual impl: the client handle is opaque and not Debug.
impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("session", &self.session)
            .field("broker_host", &self.broker_host)
            .field("port", &self.port)
            .field("publish_topic", &self.publish_topic)
            .field("subscribe_topic", &self.subscribe_topic)
            .field("cursor", &self.cursor)
            .field("bound_surface", &self.bound_surface)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a connection for UI status display (menu tooltips, titlebar
/// indicators).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub broker_host: String,
    pub port: u16,
    pub publish_topic: Option<String>,
    pub subscribe_topic: Option<String>,
    pub cursor: CursorPosition,
    pub connected: bool,
}

impl ConnectionInfo {
    /// Human-readable one-liner, in the shape the terminal menu shows.
    pub fn summary(&self) -> String {
        let endpoint = format!("{}:{}", self.broker_host, self.port);
        match (&self.publish_topic, &self.subscribe_topic) {
            (Some(p), Some(s)) => {
                format!("Publishing to {p}, subscribed to {s} on {endpoint}")
            }
            (Some(p), None) => format!("Publishing to {p} on {endpoint}"),
            (None, Some(s)) => format!("Subscribed to {s} on {endpoint}"),
            (None, None) => endpoint,
        }
    }
}
