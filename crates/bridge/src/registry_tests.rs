//! Registry behavior tests against scripted fakes.
//!
//! The fakes stand in for the terminal and the broker client: the session
//! host exposes a scriptable line grid per surface, and the transport logs
//! every call made on every connection it hands out, so tests can assert on
//! exactly what the registry did to each client handle.

use crate::registry::{normalize_payload, ConnectionRegistry};
use broker::{
    BrokerConnection, BrokerEvent, BrokerEventKind, BrokerTransport, ConnectError, ConnectParams,
    PublishError, TeardownError,
};
use collections::{FxHashMap, FxHashSet};
use pretty_assertions::assert_eq;
use session::{CursorPosition, SessionHost, SessionId, SurfaceId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use test_case::test_case;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeSurface {
    lines: Vec<String>,
    partial: String,
}

impl FakeSurface {
    fn cursor(&self) -> CursorPosition {
        CursorPosition::new(self.lines.len(), self.partial.chars().count())
    }
}

/// Scriptable `SessionHost`: tests push output lines and swap surfaces, and
/// inspect what was injected or (un)bound.
#[derive(Default)]
struct FakeHost {
    open: FxHashSet<SessionId>,
    surfaces: FxHashMap<SessionId, SurfaceId>,
    output: FxHashMap<SurfaceId, FakeSurface>,
    injected: Vec<(SessionId, String)>,
    watches: FxHashMap<SessionId, SurfaceId>,
    unbind_calls: Vec<SessionId>,
}

impl FakeHost {
    fn open_session(&mut self) -> SessionId {
        let session = SessionId::new();
        let surface = SurfaceId::next();
        self.open.insert(session);
        self.surfaces.insert(session, surface);
        self.output.insert(surface, FakeSurface::default());
        session
    }

    fn close(&mut self, session: SessionId) {
        self.open.remove(&session);
        if let Some(surface) = self.surfaces.remove(&session) {
            self.output.remove(&surface);
        }
    }

    /// Swap the session's surface for a fresh (empty) one, as a split does.
    fn split(&mut self, session: SessionId) -> SurfaceId {
        let surface = SurfaceId::next();
        self.surfaces.insert(session, surface);
        self.output.insert(surface, FakeSurface::default());
        surface
    }

    fn surface_mut(&mut self, session: SessionId) -> &mut FakeSurface {
        let surface = self.surfaces[&session];
        self.output.get_mut(&surface).expect("live surface")
    }

    fn push_line(&mut self, session: SessionId, line: &str) {
        self.surface_mut(session).lines.push(line.to_string());
    }

    fn set_partial(&mut self, session: SessionId, text: &str) {
        self.surface_mut(session).partial = text.to_string();
    }
}

impl SessionHost for FakeHost {
    fn open_sessions(&self) -> FxHashSet<SessionId> {
        self.open.clone()
    }

    fn active_surface(&self, session: SessionId) -> Option<SurfaceId> {
        self.surfaces.get(&session).copied()
    }

    fn cursor(&self, surface: SurfaceId) -> Option<CursorPosition> {
        self.output.get(&surface).map(FakeSurface::cursor)
    }

    fn read_output_since(
        &self,
        surface: SurfaceId,
        from: CursorPosition,
    ) -> Option<(String, CursorPosition)> {
        let out = self.output.get(&surface)?;
        let current = out.cursor();
        if from.row > current.row || (from.row == current.row && from.col > current.col) {
            return None;
        }
        let mut text = String::new();
        if from.row == current.row {
            text.extend(out.partial.chars().skip(from.col));
        } else {
            for (i, line) in out.lines[from.row..].iter().enumerate() {
                if i == 0 {
                    text.extend(line.chars().skip(from.col));
                } else {
                    text.push_str(line);
                }
                text.push('\n');
            }
            text.push_str(&out.partial);
        }
        Some((text, current))
    }

    fn inject_input(&mut self, session: SessionId, text: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.open.contains(&session), "no open session {session}");
        self.injected.push((session, text.to_string()));
        Ok(())
    }

    fn bind_output_watch(&mut self, session: SessionId, surface: SurfaceId) {
        self.watches.insert(session, surface);
    }

    fn unbind_output_watch(&mut self, session: SessionId) {
        self.unbind_calls.push(session);
        self.watches.remove(&session);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BrokerCall {
    Subscribe(String),
    Publish(String, String),
    Unsubscribe(String),
    Disconnect,
}

type CallLog = Arc<Mutex<Vec<(usize, BrokerCall)>>>;

/// Transport whose connections log every call, tagged with a per-connection
/// id so tests can tell the old client handle from the new one.
#[derive(Default)]
struct FakeTransport {
    calls: CallLog,
    next_id: AtomicUsize,
    refuse_connect: AtomicBool,
    refuse_subscribe: AtomicBool,
    fail_publish: Arc<AtomicBool>,
}

impl FakeTransport {
    fn calls_for(&self, conn: usize) -> Vec<BrokerCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == conn)
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn all_calls(&self) -> Vec<BrokerCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn publishes(&self) -> Vec<(String, String)> {
        self.all_calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Publish(topic, body) => Some((topic, body)),
                _ => None,
            })
            .collect()
    }
}

impl BrokerTransport for FakeTransport {
    fn connect(
        &self,
        _session: SessionId,
        _params: &ConnectParams,
        _events: Sender<BrokerEvent>,
    ) -> Result<Box<dyn BrokerConnection>, ConnectError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(ConnectError::Transport("connection refused".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            id,
            calls: self.calls.clone(),
            refuse_subscribe: self.refuse_subscribe.load(Ordering::SeqCst),
            fail_publish: self.fail_publish.clone(),
        }))
    }
}

struct FakeConnection {
    id: usize,
    calls: CallLog,
    refuse_subscribe: bool,
    fail_publish: Arc<AtomicBool>,
}

impl FakeConnection {
    fn log(&self, call: BrokerCall) {
        self.calls.lock().unwrap().push((self.id, call));
    }
}

impl BrokerConnection for FakeConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectError> {
        if self.refuse_subscribe {
            return Err(ConnectError::SubscribeRejected {
                topic: topic.to_string(),
                reason: "not authorized".into(),
            });
        }
        self.log(BrokerCall::Subscribe(topic.to_string()));
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PublishError {
                topic: topic.to_string(),
                reason: "broker unavailable".into(),
            });
        }
        self.log(BrokerCall::Publish(
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TeardownError> {
        self.log(BrokerCall::Unsubscribe(topic.to_string()));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TeardownError> {
        self.log(BrokerCall::Disconnect);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    host: FakeHost,
    transport: Arc<FakeTransport>,
    registry: ConnectionRegistry,
    _events_rx: Receiver<BrokerEvent>,
}

fn params() -> ConnectParams {
    ConnectParams::new("broker.local", 1883)
        .with_publish_topic("term/out")
        .with_subscribe_topic("term/in")
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(FakeTransport::default());
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            host: FakeHost::default(),
            transport: transport.clone(),
            registry: ConnectionRegistry::new(transport, events_tx),
            _events_rx: events_rx,
        }
    }

    /// Open a session and configure it with both topics.
    fn configured_session(&mut self) -> SessionId {
        let session = self.host.open_session();
        self.registry
            .configure(&mut self.host, session, params())
            .expect("configure");
        session
    }

    /// Deliver a broker event as the UI drain loop would.
    fn deliver(&mut self, session: SessionId, kind: BrokerEventKind) {
        self.registry
            .handle_broker_event(&mut self.host, BrokerEvent { session, kind });
    }

    /// Mark the session's connection fully acknowledged.
    fn acknowledge(&mut self, session: SessionId) {
        self.deliver(session, BrokerEventKind::ConnAck);
        self.deliver(session, BrokerEventKind::SubAck);
    }
}

// ============================================================================
// Configure / reconfigure
// ============================================================================

#[test]
fn configure_subscribes_binds_and_snapshots_cursor() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    h.host.push_line(session, "before");
    h.host.set_partial(session, "pr");

    h.registry
        .configure(&mut h.host, session, params())
        .expect("configure");

    assert_eq!(
        h.transport.all_calls(),
        vec![BrokerCall::Subscribe("term/in".into())]
    );
    let surface = h.host.active_surface(session).unwrap();
    assert_eq!(h.host.watches.get(&session), Some(&surface));
    let info = h.registry.connection_info(session).expect("record");
    assert_eq!(info.cursor, CursorPosition::new(1, 2));
    assert!(!info.connected);
}

#[test]
fn configure_twice_leaves_one_record_and_releases_the_old_client() {
    let mut h = Harness::new();
    let session = h.configured_session();

    h.registry
        .configure(&mut h.host, session, params())
        .expect("reconfigure");

    // Old handle (id 0) was unsubscribed and disconnected; new handle (id 1)
    // only subscribed.
    assert_eq!(
        h.transport.calls_for(0),
        vec![
            BrokerCall::Subscribe("term/in".into()),
            BrokerCall::Unsubscribe("term/in".into()),
            BrokerCall::Disconnect,
        ]
    );
    assert_eq!(
        h.transport.calls_for(1),
        vec![BrokerCall::Subscribe("term/in".into())]
    );
    assert!(h.registry.connection_info(session).is_some());
}

#[test]
fn configure_requires_an_open_session() {
    let mut h = Harness::new();
    let session = SessionId::new();
    let err = h
        .registry
        .configure(&mut h.host, session, params())
        .expect_err("closed session");
    assert!(matches!(err, ConnectError::SessionClosed));
}

#[test]
fn configure_requires_at_least_one_topic() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    let err = h
        .registry
        .configure(&mut h.host, session, ConnectParams::new("broker.local", 1883))
        .expect_err("no topics");
    assert!(matches!(err, ConnectError::NoTopics));
}

#[test]
fn refused_connect_stores_no_record() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    h.transport.refuse_connect.store(true, Ordering::SeqCst);

    let err = h
        .registry
        .configure(&mut h.host, session, params())
        .expect_err("refused");
    assert!(matches!(err, ConnectError::Transport(_)));
    assert!(h.registry.connection_info(session).is_none());
    assert!(h.host.watches.is_empty());
}

#[test]
fn rejected_subscribe_discards_the_fresh_client() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    h.transport.refuse_subscribe.store(true, Ordering::SeqCst);

    let err = h
        .registry
        .configure(&mut h.host, session, params())
        .expect_err("rejected");
    assert!(matches!(err, ConnectError::SubscribeRejected { .. }));
    assert!(h.registry.connection_info(session).is_none());
    assert_eq!(h.transport.calls_for(0), vec![BrokerCall::Disconnect]);
}

#[test]
fn publisher_only_records_never_subscribe() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    let params = ConnectParams::new("broker.local", 1883).with_publish_topic("term/out");

    h.registry
        .configure(&mut h.host, session, params)
        .expect("configure");

    assert!(h.transport.all_calls().is_empty());
}

// ============================================================================
// Output deltas
// ============================================================================

#[test]
fn sub_row_cursor_movement_publishes_nothing() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.host.set_partial(session, "ls");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(h.transport.publishes(), vec![]);
    // Cursor did not advance either; the partial line is still pending.
    let info = h.registry.connection_info(session).unwrap();
    assert_eq!(info.cursor, CursorPosition::default());
}

#[test]
fn completed_line_is_published_without_its_trailing_newline() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.host.push_line(session, "ls");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(
        h.transport.publishes(),
        vec![("term/out".to_string(), "ls".to_string())]
    );
    let info = h.registry.connection_info(session).unwrap();
    assert_eq!(info.cursor, CursorPosition::new(1, 0));
}

#[test]
fn multi_line_delta_is_published_as_one_message() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.host.push_line(session, "README.md");
    h.host.push_line(session, "src");
    h.host.set_partial(session, "$ ");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(
        h.transport.publishes(),
        vec![("term/out".to_string(), "README.md\nsrc\n$ ".to_string())]
    );
    let info = h.registry.connection_info(session).unwrap();
    assert_eq!(info.cursor, CursorPosition::new(2, 2));
}

#[test]
fn empty_delta_advances_the_cursor_without_publishing() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    // One bare newline: the delta is "\n", which strips to nothing.
    h.host.push_line(session, "");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(h.transport.publishes(), vec![]);
    let info = h.registry.connection_info(session).unwrap();
    assert_eq!(info.cursor, CursorPosition::new(1, 0));
}

#[test]
fn deltas_before_acknowledgement_advance_the_cursor_silently() {
    let mut h = Harness::new();
    let session = h.configured_session();
    // No acknowledge: record exists but is not connected yet.

    h.host.push_line(session, "offline output");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(h.transport.publishes(), vec![]);
    let info = h.registry.connection_info(session).unwrap();
    assert_eq!(info.cursor, CursorPosition::new(1, 0));
}

#[test]
fn publish_failure_is_swallowed_and_detection_continues() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);
    h.transport.fail_publish.store(true, Ordering::SeqCst);

    h.host.push_line(session, "lost");
    h.registry.on_output_changed(&mut h.host, session);

    h.transport.fail_publish.store(false, Ordering::SeqCst);
    h.host.push_line(session, "kept");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(
        h.transport.publishes(),
        vec![("term/out".to_string(), "kept".to_string())]
    );
}

#[test]
fn subscriber_only_records_ignore_output() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    let params = ConnectParams::new("broker.local", 1883).with_subscribe_topic("term/in");
    h.registry
        .configure(&mut h.host, session, params)
        .expect("configure");
    h.acknowledge(session);

    h.host.push_line(session, "ls");
    h.registry.on_output_changed(&mut h.host, session);

    assert_eq!(h.transport.publishes(), vec![]);
}

// ============================================================================
// Surface replacement
// ============================================================================

#[test]
fn surface_replacement_rebinds_first_then_publishes() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    let new_surface = h.host.split(session);

    // First notification after the swap: rebind only, no publish even though
    // the new surface already has output.
    h.host.push_line(session, "on new surface");
    h.registry.on_output_changed(&mut h.host, session);
    assert_eq!(h.transport.publishes(), vec![]);
    assert_eq!(h.host.watches.get(&session), Some(&new_surface));

    // Second notification publishes normally from the new surface.
    h.host.push_line(session, "more");
    h.registry.on_output_changed(&mut h.host, session);
    assert_eq!(
        h.transport.publishes(),
        vec![("term/out".to_string(), "on new surface\nmore".to_string())]
    );
}

// ============================================================================
// Inbound messages
// ============================================================================

#[test_case(b"echo hi\r\n", "echo hi\n" ; "crlf")]
#[test_case(b"echo hi\n", "echo hi\n" ; "lf")]
#[test_case(b"echo hi", "echo hi\n" ; "bare")]
#[test_case(b"echo hi\n\r\n\n", "echo hi\n" ; "newline pile")]
fn inbound_payloads_are_normalized_before_injection(payload: &[u8], expected: &str) {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.deliver(session, BrokerEventKind::Message(payload.to_vec()));

    assert_eq!(h.host.injected, vec![(session, expected.to_string())]);
}

#[test]
fn message_for_a_vanished_session_triggers_self_healing_teardown() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.host.close(session);
    h.deliver(session, BrokerEventKind::Message(b"stale".to_vec()));

    assert!(h.host.injected.is_empty());
    // One subscribe at configure, one restored on ConnAck, then teardown.
    assert_eq!(
        h.transport.calls_for(0),
        vec![
            BrokerCall::Subscribe("term/in".into()),
            BrokerCall::Subscribe("term/in".into()),
            BrokerCall::Unsubscribe("term/in".into()),
            BrokerCall::Disconnect,
        ]
    );
    assert!(h.registry.connection_info(session).is_none());
    assert!(h.registry.status_indicator(session).is_none());
}

#[test]
fn message_racing_a_disconnect_is_dropped_silently() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);
    h.registry.disconnect(&mut h.host, session);

    h.deliver(session, BrokerEventKind::Message(b"late".to_vec()));

    assert!(h.host.injected.is_empty());
}

// ============================================================================
// Lifecycle & status
// ============================================================================

#[test]
fn disconnect_is_idempotent_and_unbinds_the_watch() {
    let mut h = Harness::new();
    let session = h.configured_session();

    h.registry.disconnect(&mut h.host, session);
    h.registry.disconnect(&mut h.host, session);

    assert_eq!(h.host.unbind_calls, vec![session]);
    assert!(!h.host.watches.contains_key(&session));
    assert_eq!(
        h.transport.calls_for(0),
        vec![
            BrokerCall::Subscribe("term/in".into()),
            BrokerCall::Unsubscribe("term/in".into()),
            BrokerCall::Disconnect,
        ]
    );
}

#[test]
fn closed_session_is_inert_to_further_notifications() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    h.registry.on_session_closed(&mut h.host, session);
    h.host.close(session);

    h.registry.on_output_changed(&mut h.host, session);
    h.deliver(session, BrokerEventKind::Message(b"ignored".to_vec()));
    h.deliver(session, BrokerEventKind::SubAck);

    assert!(h.host.injected.is_empty());
    assert!(h.registry.connection_info(session).is_none());
    assert!(!h.registry.is_connected(session));
    assert!(h.registry.status_indicator(session).is_none());
    // Exactly the one teardown from on_session_closed.
    let disconnects = h
        .transport
        .all_calls()
        .iter()
        .filter(|c| **c == BrokerCall::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn connected_flag_follows_acknowledgement_and_loss() {
    let mut h = Harness::new();
    let session = h.configured_session();
    assert!(!h.registry.is_connected(session));

    // ConnAck alone is not enough for a subscribing record.
    h.deliver(session, BrokerEventKind::ConnAck);
    assert!(!h.registry.is_connected(session));

    h.deliver(session, BrokerEventKind::SubAck);
    assert!(h.registry.is_connected(session));

    h.deliver(session, BrokerEventKind::ConnectionLost("io".into()));
    assert!(!h.registry.is_connected(session));
}

#[test]
fn reconnect_restores_the_subscription_and_resumes_publishing() {
    let mut h = Harness::new();
    let session = h.configured_session();
    h.acknowledge(session);

    // Transient network failure; the client reconnects on its own, but the
    // broker has forgotten our subscription.
    h.deliver(session, BrokerEventKind::ConnectionLost("io".into()));
    assert!(!h.registry.is_connected(session));

    h.deliver(session, BrokerEventKind::ConnAck);
    let subscribes = h
        .transport
        .all_calls()
        .iter()
        .filter(|c| matches!(c, BrokerCall::Subscribe(_)))
        .count();
    assert_eq!(subscribes, 3, "configure + two ConnAcks");

    h.deliver(session, BrokerEventKind::SubAck);
    assert!(h.registry.is_connected(session));

    h.host.push_line(session, "after reconnect");
    h.registry.on_output_changed(&mut h.host, session);
    assert_eq!(
        h.transport.publishes(),
        vec![("term/out".to_string(), "after reconnect".to_string())]
    );
}

#[test]
fn publish_only_records_connect_on_connack() {
    let mut h = Harness::new();
    let session = h.host.open_session();
    let params = ConnectParams::new("broker.local", 1883).with_publish_topic("term/out");
    h.registry
        .configure(&mut h.host, session, params)
        .expect("configure");

    h.deliver(session, BrokerEventKind::ConnAck);
    assert!(h.registry.is_connected(session));
}

#[test]
fn status_indicator_reflects_connection_state() {
    let mut h = Harness::new();
    let session = h.configured_session();

    let status = h.registry.status_indicator(session).expect("indicator");
    assert!(status.ends_with("(not connected)"), "{status}");

    h.acknowledge(session);
    let status = h.registry.status_indicator(session).expect("indicator");
    assert_eq!(
        status,
        "Publishing to term/out, subscribed to term/in on broker.local:1883"
    );
}

// ============================================================================
// Payload normalization
// ============================================================================

mod normalization {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn always_ends_with_exactly_one_newline(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let text = normalize_payload(&payload);
            prop_assert!(text.ends_with('\n'));
            prop_assert!(!text.ends_with("\n\n") || text == "\n");
        }

        #[test]
        fn is_idempotent(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let once = normalize_payload(&payload);
            let twice = normalize_payload(once.as_bytes());
            prop_assert_eq!(once, twice);
        }
    }
}
