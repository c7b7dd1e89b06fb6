//! Transport seam types.

use crate::error::{ConnectError, PublishError, TeardownError};
use session::SessionId;
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Username/password pair for brokers that require authentication.
///
/// `Debug` redacts the password so records and params can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open one broker connection for one session.
///
/// A connection may publish only, subscribe only, or both; at least one
/// topic must be present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectParams {
    pub broker_host: String,
    pub port: u16,
    pub publish_topic: Option<String>,
    pub subscribe_topic: Option<String>,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
}

impl ConnectParams {
    pub fn new(broker_host: impl Into<String>, port: u16) -> Self {
        Self {
            broker_host: broker_host.into(),
            port,
            publish_topic: None,
            subscribe_topic: None,
            credentials: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    pub fn with_publish_topic(mut self, topic: impl Into<String>) -> Self {
        self.publish_topic = Some(topic.into());
        self
    }

    pub fn with_subscribe_topic(mut self, topic: impl Into<String>) -> Self {
        self.subscribe_topic = Some(topic.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Role tag used in the MQTT client id, mirroring which directions this
    /// connection serves.
    pub fn role(&self) -> &'static str {
        match (&self.publish_topic, &self.subscribe_topic) {
            (Some(_), Some(_)) => "bridge",
            (Some(_), None) => "publisher",
            _ => "subscriber",
        }
    }
}

/// What happened on the broker context, tagged with the owning session.
///
/// Events carry the session *identity*, never a session reference: the
/// receiving side re-resolves the live session on the UI context, so a
/// surface swap or session close between send and drain cannot dangle.
#[derive(Debug)]
pub struct BrokerEvent {
    pub session: SessionId,
    pub kind: BrokerEventKind,
}

#[derive(Debug)]
pub enum BrokerEventKind {
    /// Broker accepted the connection.
    ConnAck,
    /// Broker acknowledged our subscription.
    SubAck,
    /// Inbound message payload on the subscribed topic.
    Message(Vec<u8>),
    /// Clean disconnect initiated by either side.
    Disconnected,
    /// Network loop error; the client will retry on its own.
    ConnectionLost(String),
}

/// Factory for broker connections.
///
/// `connect` must not block on network I/O: it validates parameters, starts
/// the network loop on the broker context, and returns immediately. Async
/// outcomes (connack, suback, messages, drops) arrive through `events`.
pub trait BrokerTransport {
    fn connect(
        &self,
        session: SessionId,
        params: &ConnectParams,
        events: Sender<BrokerEvent>,
    ) -> Result<Box<dyn BrokerConnection>, ConnectError>;
}

/// One live broker connection, owned exclusively by its connection record.
///
/// All methods are non-blocking; the underlying client buffers outbound
/// requests on its own worker.
pub trait BrokerConnection: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TeardownError>;

    /// Disconnect and stop the network loop. Used by teardown; also runs on
    /// drop so an orphaned handle cannot leak its loop.
    fn disconnect(&mut self) -> Result<(), TeardownError>;
}
