//! Outbound publish/subscribe boundary.
//!
//! The pipeline only ever sees the `AlertPublisher` trait; the MQTT
//! implementation lives in `mqtt`. Topic names are literal conventions
//! shared with the listener-side tools and must not change.

pub mod mqtt;

pub use mqtt::MqttPublisher;

/// Presence alerts (PERSON_DETECTED / PERSON_GONE), at-least-once.
pub const TOPIC_ALERT: &str = "smart_office/camera/alert";
/// Batched detection logs, at-least-once.
pub const TOPIC_DETECTION_LOG: &str = "smart_office/camera/detection_log";

/// Annotated JPEG stream topic for one camera, best-effort.
pub fn stream_topic(camera_id: &str) -> String {
    format!("smart_office/camera/{}/stream", camera_id)
}

/// Delivery guarantee requested for one publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QosLevel {
    /// Best-effort, may drop (streams).
    AtMostOnce,
    /// At-least-once (alerts, logs).
    AtLeastOnce,
}

/// Outbound payload, distinguished by kind rather than by topic: a
/// structured record serialized as text, or raw image bytes.
#[derive(Clone, Debug)]
pub enum Payload {
    Structured(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Structured(text) => text.into_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Structured(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Structured(_) => "structured",
            Payload::Binary(_) => "binary",
        }
    }
}

/// Outbound channel for alerts, batched logs, and annotated-frame streams.
///
/// Publish calls report success or failure; the pipeline logs failures and
/// drops the payload rather than retrying, so the real-time loop never
/// blocks on the transport. Reconnection is the transport's concern.
pub trait AlertPublisher: Send {
    fn connect(&mut self) -> bool;
    fn publish(&mut self, topic: &str, payload: Payload, qos: QosLevel) -> bool;
    fn disconnect(&mut self);
}
