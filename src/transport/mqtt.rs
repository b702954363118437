//! MQTT alert notifier.
//!
//! `connect` waits for the broker's CONNACK before returning, so a dead broker
//! is a startup error. After that the rumqttc event loop runs on its own
//! thread; publishing only enqueues a request and never blocks the frame loop.

use anyhow::{anyhow, bail, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::actions::{AlertMessage, AlertNotifier};
use crate::config::MqttSettings;

const REQUEST_QUEUE_CAPACITY: usize = 10;

pub struct MqttNotifier {
    client: Client,
    topic: String,
    online: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttNotifier {
    /// Connect to the broker, blocking up to `settings.connect_timeout`.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.broker, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);

        let (client, mut connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        wait_for_connack(&mut connection, settings)?;
        log::info!(
            "MqttNotifier: connected to {}:{} (topic {})",
            settings.broker,
            settings.port,
            settings.topic
        );

        let online = Arc::new(AtomicBool::new(true));
        let thread_online = Arc::clone(&online);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
            thread_online.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            client,
            topic: settings.topic.clone(),
            online,
            connection_handle: Some(handle),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueue `payload` on `topic` at QoS 1 without waiting for the broker.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            bail!("MQTT connection is down");
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }

    pub fn disconnect(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        let result = self.client.try_disconnect();
        if result.is_ok() {
            let _ = handle.join();
        }
        self.online.store(false, Ordering::SeqCst);
        log::info!("MqttNotifier: disconnected");
        result.map_err(|e| anyhow!("MQTT disconnect failed: {}", e))
    }
}

impl AlertNotifier for MqttNotifier {
    fn notify(&mut self, message: &AlertMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.publish(&self.topic, payload)
    }

    fn close(&mut self) -> Result<()> {
        self.disconnect()
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("{}", e);
        }
    }
}

fn wait_for_connack(connection: &mut Connection, settings: &MqttSettings) -> Result<()> {
    let deadline = Instant::now() + settings.connect_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!(
                "timed out connecting to MQTT broker {}:{} after {:?}",
                settings.broker,
                settings.port,
                settings.connect_timeout
            );
        }
        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => return Ok(()),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                bail!(
                    "failed to connect to MQTT broker {}:{}: {}",
                    settings.broker,
                    settings.port,
                    e
                )
            }
            Err(_) => {}
        }
    }
}
