//! rumqttc-backed broker transport.
//!
//! Owns a small tokio runtime for network I/O so the UI context never blocks
//! on the broker. Each connection gets its own event-loop task that forwards
//! rumqttc events to the UI-bound queue as `BrokerEvent`s tagged with the
//! owning session id. Reconnect/backoff is rumqttc's problem, not ours.

use crate::client::{BrokerConnection, BrokerEvent, BrokerEventKind, BrokerTransport, ConnectParams};
use crate::error::{ConnectError, PublishError, TeardownError};
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use session::SessionId;
use std::sync::mpsc::Sender;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// rumqttc requires a keep-alive of at least five seconds.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Delay before re-polling after a network loop error, to avoid a hot spin
/// while the broker is unreachable.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Production `BrokerTransport` over rumqttc.
pub struct MqttTransport {
    runtime: Runtime,
    client_id_prefix: String,
}

impl MqttTransport {
    pub fn new(client_id_prefix: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("termbridge-mqtt")
            .enable_all()
            .build()
            .context("Failed to initialize MQTT runtime")?;

        Ok(Self {
            runtime,
            client_id_prefix: client_id_prefix.into(),
        })
    }

    /// Client ids must be unique per broker; include a session fragment so
    /// several sessions can bridge through the same broker at once.
    fn client_id(&self, session: SessionId, params: &ConnectParams) -> String {
        let session = session.to_string();
        let fragment = &session[..8];
        format!(
            "{}-{}-{}-{}",
            self.client_id_prefix,
            std::process::id(),
            params.role(),
            fragment
        )
    }
}

fn validate(params: &ConnectParams) -> Result<(), ConnectError> {
    if params.broker_host.trim().is_empty() {
        return Err(ConnectError::EmptyAddress);
    }
    if params.broker_host.contains("://") || params.broker_host.contains(char::is_whitespace) {
        return Err(ConnectError::Transport(format!(
            "malformed broker address '{}'",
            params.broker_host
        )));
    }
    if params.port == 0 {
        return Err(ConnectError::InvalidPort);
    }
    Ok(())
}

impl BrokerTransport for MqttTransport {
    fn connect(
        &self,
        session: SessionId,
        params: &ConnectParams,
        events: Sender<BrokerEvent>,
    ) -> Result<Box<dyn BrokerConnection>, ConnectError> {
        validate(params)?;

        let mut options = MqttOptions::new(
            self.client_id(session, params),
            params.broker_host.clone(),
            params.port,
        );
        options.set_keep_alive(params.keep_alive.max(MIN_KEEP_ALIVE));
        if let Some(credentials) = &params.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);

        let task = self.runtime.spawn(async move {
            loop {
                let kind = match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => Some(BrokerEventKind::ConnAck),
                    Ok(Event::Incoming(Packet::SubAck(_))) => Some(BrokerEventKind::SubAck),
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        Some(BrokerEventKind::Message(publish.payload.to_vec()))
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => Some(BrokerEventKind::Disconnected),
                    Ok(_) => None,
                    Err(e) => {
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        Some(BrokerEventKind::ConnectionLost(e.to_string()))
                    }
                };
                if let Some(kind) = kind {
                    // Receiver gone means the bridge shut down; stop the loop.
                    if events.send(BrokerEvent { session, kind }).is_err() {
                        break;
                    }
                }
            }
            debug!("MQTT event loop for session {} stopped", session);
        });

        Ok(Box::new(MqttConnection {
            client,
            task,
            stopped: false,
        }))
    }
}

struct MqttConnection {
    client: AsyncClient,
    task: JoinHandle<()>,
    stopped: bool,
}

impl BrokerConnection for MqttConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| ConnectError::SubscribeRejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TeardownError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TeardownError::new("unsubscribe", e))
    }

    fn disconnect(&mut self) -> Result<(), TeardownError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| TeardownError::new("disconnect", e));
        // The loop task is aborted either way; the disconnect request is
        // best-effort and the broker will drop the socket regardless.
        self.task.abort();
        result
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.disconnect() {
                warn!("Disconnect on drop failed: {}", e);
            }
        }
    }
}
