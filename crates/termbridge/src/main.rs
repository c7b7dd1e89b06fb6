//! Termbridge - bridge local terminal sessions to an MQTT broker.
//!
//! Headless entry point: spawns a local shell, connects it to the configured
//! broker, and runs the UI-context loop that pumps PTY output into the
//! registry and drains broker events back into the session.

use anyhow::{Context, Result};
use bridge::ConnectionRegistry;
use broker::{ConnectParams, MqttTransport};
use session::PtySessionHost;
use settings::expand_topic;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval for the bridge loop. PTY output and broker events are both
/// queue-drained, so this only bounds idle latency.
const TICK: Duration = Duration::from_millis(10);

/// Check if debug mode is enabled via environment variable.
fn is_debug_mode() -> bool {
    std::env::var("TERMBRIDGE_DEBUG").is_ok()
}

/// Initialize the logging system.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if is_debug_mode() {
        "termbridge=trace,bridge=trace,broker=debug,session=debug,info"
    } else {
        "termbridge=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_line_number(true))
        .with(filter)
        .init();

    info!("Termbridge v{} starting up", env!("CARGO_PKG_VERSION"));
}

fn connect_params(config: &settings::Config, session: session::SessionId) -> ConnectParams {
    let mut params = ConnectParams::new(config.broker_host.clone(), config.broker_port)
        .with_publish_topic(expand_topic(&config.publish_topic, session))
        .with_subscribe_topic(expand_topic(&config.subscribe_topic, session));
    params.keep_alive = Duration::from_secs(config.keep_alive_secs);

    if let Some(username) = &config.username {
        let password = std::env::var("TERMBRIDGE_MQTT_PASSWORD").unwrap_or_default();
        params = params.with_credentials(username.clone(), password);
    }
    params
}

fn main() -> Result<()> {
    init_logging();

    let config = settings::load_config();
    debug!(
        "Using broker {}:{}",
        config.broker_host, config.broker_port
    );

    let mut host = PtySessionHost::new();
    let session = host
        .spawn_shell(24, 80)
        .context("Failed to spawn shell session")?;

    let transport =
        Arc::new(MqttTransport::new(&config.client_id_prefix).context("Failed to start MQTT transport")?);
    let (events_tx, events_rx) = mpsc::channel();
    let mut registry = ConnectionRegistry::new(transport, events_tx);

    let params = connect_params(&config, session);
    registry
        .configure(&mut host, session, params)
        .with_context(|| {
            format!(
                "Failed to connect session to {}:{}",
                config.broker_host, config.broker_port
            )
        })?;

    if let Some(info) = registry.connection_info(session) {
        info!("Session {}: {}", session, info.summary());
    }

    loop {
        for changed in host.pump() {
            registry.on_output_changed(&mut host, changed);
        }
        while let Ok(event) = events_rx.try_recv() {
            registry.handle_broker_event(&mut host, event);
        }
        if host.has_exited(session) {
            info!("Shell exited; shutting down session {}", session);
            registry.on_session_closed(&mut host, session);
            host.close_session(session);
            break;
        }
        std::thread::sleep(TICK);
    }

    Ok(())
}
