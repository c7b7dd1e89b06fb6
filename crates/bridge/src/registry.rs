//! The registry proper: configure, disconnect, delta detection, inbound
//! routing, and best-effort teardown.

use crate::record::{ConnectionInfo, ConnectionRecord};
use broker::{BrokerEvent, BrokerEventKind, BrokerTransport, ConnectError, ConnectParams, TeardownError};
use collections::FxHashMap;
use session::{SessionHost, SessionId};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, info, warn};
use util::debug_panic;

/// One-to-one mapping {session → broker connection}.
///
/// Confined to the UI execution context: every method (including
/// `handle_broker_event`, which drains the queue the broker context posts
/// to) must be called from the thread that owns session state. Under that
/// rule no locking is needed anywhere in here.
pub struct ConnectionRegistry {
    transport: Arc<dyn BrokerTransport>,
    events_tx: Sender<BrokerEvent>,
    records: FxHashMap<SessionId, ConnectionRecord>,
    /// Cached status strings for UI affordances, cleared on session close.
    indicators: FxHashMap<SessionId, String>,
}

impl ConnectionRegistry {
    /// `events_tx` is the UI-bound queue handed to every connection; the
    /// caller owns the receiving end and feeds drained events back through
    /// `handle_broker_event`.
    pub fn new(transport: Arc<dyn BrokerTransport>, events_tx: Sender<BrokerEvent>) -> Self {
        Self {
            transport,
            events_tx,
            records: FxHashMap::default(),
            indicators: FxHashMap::default(),
        }
    }

    /// Establish (or replace) the broker connection for `session`.
    ///
    /// Any existing connection is torn down first, best-effort; teardown
    /// failures are logged and never block the new connection. On success
    /// the session's current cursor is snapshotted and the output watch is
    /// bound to its current surface. Synchronous connect failures leave no
    /// record behind.
    pub fn configure(
        &mut self,
        host: &mut dyn SessionHost,
        session: SessionId,
        params: ConnectParams,
    ) -> Result<(), ConnectError> {
        if !host.open_sessions().contains(&session) {
            return Err(ConnectError::SessionClosed);
        }
        if params.publish_topic.is_none() && params.subscribe_topic.is_none() {
            return Err(ConnectError::NoTopics);
        }

        if let Some(old) = self.records.remove(&session) {
            info!("Replacing existing connection for session {}", session);
            self.teardown(host, old, "reconfigure");
        }

        let surface = host
            .active_surface(session)
            .ok_or(ConnectError::SessionClosed)?;
        let cursor = host.cursor(surface).unwrap_or_default();

        let mut client = self
            .transport
            .connect(session, &params, self.events_tx.clone())?;

        if let Some(topic) = &params.subscribe_topic {
            if let Err(e) = client.subscribe(topic) {
                if let Err(te) = client.disconnect() {
                    warn!("Discarding rejected connection: {}", te);
                }
                return Err(e);
            }
        }

        host.bind_output_watch(session, surface);

        let record = ConnectionRecord {
            session,
            broker_host: params.broker_host,
            port: params.port,
            publish_topic: params.publish_topic,
            subscribe_topic: params.subscribe_topic,
            cursor,
            bound_surface: surface,
            connected: false,
            client,
        };
        info!(
            "Session {} connecting to {}:{}",
            session, record.broker_host, record.port
        );
        if self.records.insert(session, record).is_some() {
            debug_panic!("duplicate connection record for session {}", session);
        }
        self.refresh_indicator(session);
        Ok(())
    }

    /// Tear down the connection for `session`, if any. Idempotent; broker
    /// errors during teardown are logged, never raised.
    pub fn disconnect(&mut self, host: &mut dyn SessionHost, session: SessionId) {
        let Some(record) = self.records.remove(&session) else {
            return;
        };
        self.teardown(host, record, "disconnect");
        self.indicators.remove(&session);
    }

    /// New output is available on `session`'s active surface.
    ///
    /// If the surface changed since the watch was bound, this call only
    /// rebinds — publishing from a notification raised by a stale surface
    /// would race the replacement. Otherwise output is published in whole
    /// lines: deltas of less than one row are coalesced, the single trailing
    /// newline is stripped, and the stored cursor advances whether or not
    /// anything was published.
    pub fn on_output_changed(&mut self, host: &mut dyn SessionHost, session: SessionId) {
        let Some(record) = self.records.get_mut(&session) else {
            return;
        };
        let Some(surface) = host.active_surface(session) else {
            return;
        };

        if surface != record.bound_surface {
            debug!(
                "Session {} surface replaced ({} -> {}); rebinding watch",
                session, record.bound_surface, surface
            );
            host.bind_output_watch(session, surface);
            record.bound_surface = surface;
            return;
        }

        let Some(topic) = record.publish_topic.clone() else {
            return; // subscriber-only record
        };
        let Some(current) = host.cursor(surface) else {
            return;
        };
        if current.rows_since(record.cursor) < 1 {
            return; // coalesce sub-line updates
        }
        let Some((text, new_cursor)) = host.read_output_since(surface, record.cursor) else {
            return;
        };

        // Line-buffered output ends in exactly one newline; don't send it.
        let body = text.strip_suffix('\n').unwrap_or(&text);
        if !body.is_empty() && record.connected {
            if let Err(e) = record.client.publish(&topic, body.as_bytes()) {
                warn!("Dropped output delta for session {}: {}", session, e);
            }
        }
        record.cursor = new_cursor;
    }

    /// Apply one event drained from the broker queue.
    ///
    /// Inbound messages re-resolve the live session by identity; a session
    /// that closed while the message was in flight triggers self-healing
    /// teardown instead of injection.
    pub fn handle_broker_event(&mut self, host: &mut dyn SessionHost, event: BrokerEvent) {
        let session = event.session;
        match event.kind {
            BrokerEventKind::ConnAck => {
                if let Some(record) = self.records.get_mut(&session) {
                    match &record.subscribe_topic {
                        // Broker-side subscriptions do not survive a
                        // reconnect; re-issue ours on every ConnAck. The
                        // fresh SubAck restores the connected flag.
                        Some(topic) => {
                            if let Err(e) = record.client.subscribe(topic) {
                                warn!(
                                    "Session {} failed to restore subscription to '{}': {}",
                                    session, topic, e
                                );
                            }
                        }
                        None => record.connected = true,
                    }
                    debug!("Session {} connection acknowledged", session);
                }
                self.refresh_indicator(session);
            }
            BrokerEventKind::SubAck => {
                if let Some(record) = self.records.get_mut(&session) {
                    record.connected = true;
                    debug!("Session {} subscription acknowledged", session);
                }
                self.refresh_indicator(session);
            }
            BrokerEventKind::Disconnected => {
                if let Some(record) = self.records.get_mut(&session) {
                    record.connected = false;
                }
                self.refresh_indicator(session);
            }
            BrokerEventKind::ConnectionLost(reason) => {
                if let Some(record) = self.records.get_mut(&session) {
                    record.connected = false;
                    warn!("Session {} lost broker connection: {}", session, reason);
                }
                self.refresh_indicator(session);
            }
            BrokerEventKind::Message(payload) => {
                if !host.open_sessions().contains(&session) {
                    // Session closed while the message was in flight.
                    if let Some(record) = self.records.remove(&session) {
                        info!(
                            "Session {} is gone; tearing down its connection",
                            session
                        );
                        self.teardown(host, record, "session vanished");
                    }
                    self.indicators.remove(&session);
                    return;
                }
                if !self.records.contains_key(&session) {
                    // Message raced a disconnect; drop it.
                    debug!("Dropping broker message for unconfigured session {}", session);
                    return;
                }
                let text = normalize_payload(&payload);
                if let Err(e) = host.inject_input(session, &text) {
                    warn!(
                        "Failed to inject broker message into session {}: {}",
                        session, e
                    );
                }
            }
        }
    }

    /// The owning session was destroyed. Tears down like `disconnect` and
    /// drops any cached UI state for the session.
    pub fn on_session_closed(&mut self, host: &mut dyn SessionHost, session: SessionId) {
        self.disconnect(host, session);
        self.indicators.remove(&session);
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.records
            .get(&session)
            .map_or(false, |record| record.connected)
    }

    pub fn connection_info(&self, session: SessionId) -> Option<ConnectionInfo> {
        self.records.get(&session).map(ConnectionRecord::info)
    }

    /// Cached status line for UI affordances (menu tooltip, titlebar badge).
    pub fn status_indicator(&self, session: SessionId) -> Option<&str> {
        self.indicators.get(&session).map(String::as_str)
    }

    fn refresh_indicator(&mut self, session: SessionId) {
        let Some(record) = self.records.get(&session) else {
            return;
        };
        let info = record.info();
        let status = if info.connected {
            info.summary()
        } else {
            format!("{} (not connected)", info.summary())
        };
        self.indicators.insert(session, status);
    }

    /// Best-effort teardown: every step runs even if an earlier one failed,
    /// and failures are logged rather than raised.
    fn teardown(&mut self, host: &mut dyn SessionHost, mut record: ConnectionRecord, reason: &str) {
        host.unbind_output_watch(record.session);

        let mut failures: Vec<TeardownError> = Vec::new();
        if let Some(topic) = &record.subscribe_topic {
            if let Err(e) = record.client.unsubscribe(topic) {
                failures.push(e);
            }
        }
        if let Err(e) = record.client.disconnect() {
            failures.push(e);
        }

        if failures.is_empty() {
            debug!("Session {} torn down ({})", record.session, reason);
        }
        for failure in &failures {
            warn!(
                "Teardown ({}) of session {}: {}",
                reason, record.session, failure
            );
        }
    }
}

/// Normalize an inbound payload for injection: decode as UTF-8 (lossy),
/// strip all trailing line terminators, append exactly one newline.
pub(crate) fn normalize_payload(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut text = text.trim_end_matches(['\r', '\n']).to_string();
    text.push('\n');
    text
}
