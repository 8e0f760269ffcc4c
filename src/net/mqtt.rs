//! ESP-IDF MQTT session driver.
//!
//! The ESP-IDF client surfaces broker traffic as an event stream on a
//! separate connection handle. A small pump thread turns that stream into
//! the shared inbound queue the run loop drains via `service()`, keeping
//! the session seam single-threaded from the state machine's point of
//! view.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use log::{debug, warn};

use super::{InboundMessage, MqttSession, NetError, MQTT_BUFFER_SIZE};
use crate::settings::Settings;

/// How long one connect call waits for the broker's acknowledgement before
/// the attempt is abandoned and left for the next cycle.
const CONNECT_WAIT: Duration = Duration::from_secs(3);

/// Poll step while waiting for the acknowledgement.
const CONNECT_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Shared {
    connected: bool,
    inbound: VecDeque<InboundMessage>,
}

/// MQTT session over the ESP-IDF client.
pub struct EspMqttSession {
    client: Option<EspMqttClient<'static>>,
    shared: Arc<Mutex<Shared>>,
}

impl EspMqttSession {
    pub fn new() -> Self {
        Self {
            client: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }
}

impl Default for EspMqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession for EspMqttSession {
    fn connect(&mut self, settings: &Settings) -> Result<(), NetError> {
        // Drop any half-open client; its pump thread exits with it.
        self.client = None;
        {
            let mut shared = self.shared.lock().unwrap();
            shared.connected = false;
            shared.inbound.clear();
        }

        let url = format!(
            "mqtt://{}:{}",
            settings.broker_address, settings.broker_port
        );
        let conf = MqttClientConfiguration {
            client_id: Some(&settings.client_id),
            username: non_empty(&settings.mqtt_username),
            password: non_empty(&settings.mqtt_password),
            buffer_size: MQTT_BUFFER_SIZE,
            ..Default::default()
        };

        let (client, mut connection) = EspMqttClient::new(&url, &conf)
            .map_err(|e| NetError::Connect(format!("{:?}", e)))?;

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("mqtt-events".into())
            .stack_size(6144)
            .spawn(move || {
                while let Ok(event) = connection.next() {
                    let mut shared = shared.lock().unwrap();
                    match event.payload() {
                        EventPayload::Connected(_) => shared.connected = true,
                        EventPayload::Disconnected => shared.connected = false,
                        EventPayload::Received { topic, data, .. } => {
                            let Some(topic) = topic else { continue };
                            match std::str::from_utf8(data) {
                                Ok(payload) => shared.inbound.push_back(InboundMessage {
                                    topic: topic.to_string(),
                                    payload: payload.trim_end_matches('\0').to_string(),
                                }),
                                Err(_) => warn!("Dropping non-UTF-8 payload on {}", topic),
                            }
                        }
                        EventPayload::Error(e) => debug!("MQTT event error: {:?}", e),
                        _ => {}
                    }
                }
            })
            .map_err(|e| NetError::Connect(format!("event thread: {}", e)))?;

        // Wait, bounded, for the broker to acknowledge the session.
        let deadline = Instant::now() + CONNECT_WAIT;
        loop {
            if self.shared.lock().unwrap().connected {
                self.client = Some(client);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(NetError::Connect(format!(
                    "no acknowledgement from {} within {:?}",
                    url, CONNECT_WAIT
                )));
            }
            std::thread::sleep(CONNECT_POLL);
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.shared.lock().unwrap().connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), NetError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| NetError::Subscribe("no session".into()))?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|e| NetError::Subscribe(format!("{:?}", e)))
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), NetError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| NetError::Publish("no session".into()))?;
        client
            .enqueue(topic, QoS::AtMostOnce, retain, payload.as_bytes())
            .map(|_| ())
            .map_err(|e| NetError::Publish(format!("{:?}", e)))
    }

    fn service(&mut self) -> Vec<InboundMessage> {
        self.shared.lock().unwrap().inbound.drain(..).collect()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
