//! MQTT implementation of the publish boundary.
//!
//! A sync `rumqttc` client plus a background thread that drives the
//! connection event loop. The thread flips the shared connected flag on
//! ConnAck and connection errors; `rumqttc` handles broker reconnection
//! itself as long as the loop keeps polling.

use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{AlertPublisher, Payload, QosLevel};

const CHANNEL_CAPACITY: usize = 10;
const CONNECT_WAIT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

pub struct MqttPublisher {
    host: String,
    port: u16,
    client_id: String,
    client: Option<Client>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    fn spawn_driver(&mut self, mut connection: Connection) {
        let connected = Arc::clone(&self.connected);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        log::info!("MQTT connected");
                        connected.store(true, Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.swap(false, Ordering::AcqRel) {
                            log::warn!("MQTT connection error: {}", e);
                        }
                        // The iterator retries the broker on its own;
                        // pace it so a dead broker does not spin.
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });
        self.driver = Some(handle);
    }
}

impl AlertPublisher for MqttPublisher {
    fn connect(&mut self) -> bool {
        if self.client.is_some() {
            return self.connected.load(Ordering::Acquire);
        }

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, CHANNEL_CAPACITY);
        self.client = Some(client);
        self.stop.store(false, Ordering::Release);
        self.spawn_driver(connection);

        // Give the handshake a bounded window; callers get the truth
        // either way and can proceed degraded.
        let deadline = Instant::now() + CONNECT_WAIT;
        while Instant::now() < deadline {
            if self.connected.load(Ordering::Acquire) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        log::warn!(
            "MQTT broker {}:{} not reachable within {:?}",
            self.host,
            self.port,
            CONNECT_WAIT
        );
        false
    }

    fn publish(&mut self, topic: &str, payload: Payload, qos: QosLevel) -> bool {
        let Some(client) = self.client.as_ref() else {
            log::debug!("MQTT publish to {} skipped: not connected", topic);
            return false;
        };
        if !self.connected.load(Ordering::Acquire) {
            log::debug!("MQTT publish to {} skipped: link down", topic);
            return false;
        }

        let mqtt_qos = match qos {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        };
        let kind = payload.kind();
        match client.try_publish(topic, mqtt_qos, false, payload.into_bytes()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("MQTT publish ({}) to {} failed: {}", kind, topic, e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.disconnect();
    }
}
