//! Messaging transport for alert notifications.
//!
//! Alerts are published as JSON over MQTT v5 with rumqttc. TLS and broker
//! authentication are not configured; the broker is assumed to be reachable on
//! a trusted network.

mod mqtt;

pub use crate::config::MqttSettings;
pub use mqtt::MqttNotifier;
