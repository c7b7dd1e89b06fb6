//! Broker collaborator seam.
//!
//! The bridge talks to the MQTT broker through the `BrokerTransport` and
//! `BrokerConnection` traits; `MqttTransport` is the production adapter over
//! rumqttc. Network I/O runs on the transport's own runtime, and everything
//! the broker context wants to tell the UI context travels as a
//! `BrokerEvent` through a thread-safe queue.

pub mod client;
pub mod error;
mod rumqtt;

pub use client::{
    BrokerConnection, BrokerEvent, BrokerEventKind, BrokerTransport, ConnectParams, Credentials,
};
pub use error::{ConnectError, PublishError, TeardownError};
pub use rumqtt::MqttTransport;
