//! officewatch - dual-camera presence watcher.
//!
//! This crate implements the real-time detection-and-alerting pipeline:
//! two independently recovering camera sources feed an inference engine
//! with accelerator-to-CPU failover, a per-camera debounce state machine
//! turns noisy per-frame detections into discrete presence events, and a
//! quiet-period log buffer batches detection records. Alerts, batched
//! logs, and annotated JPEG streams go out over MQTT.
//!
//! # Module Structure
//!
//! - `frame`: decoded grayscale frames with capture timestamps
//! - `capture`: per-camera background acquisition with reconnect
//! - `detect`: inference backends and the failover engine
//! - `presence`: the enter/leave debounce state machine
//! - `logbuf`: detection record batching
//! - `publish`: outbound transport (trait + MQTT implementation)
//! - `stream`: bounding-box annotation and JPEG encoding
//! - `pipeline`: the scheduler tying it all together

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod logbuf;
pub mod pipeline;
pub mod presence;
pub mod publish;
pub mod stream;

pub use capture::{CaptureSource, ConnectionStatus, FrameGrabber, RetryPolicy, SyntheticGrabber};
pub use config::OfficewatchConfig;
pub use detect::{BackendKind, BoundingBox, Detection, DetectionEngine, InferenceBackend};
pub use frame::Frame;
pub use logbuf::{DetectionLogBuffer, DetectionRecord, LogBatch};
pub use pipeline::{CameraState, PipelineScheduler};
pub use presence::{PresenceEvent, PresenceStatus, PresenceTracker};
pub use publish::{AlertPublisher, MqttPublisher, Payload, QosLevel};

/// Seconds since the Unix epoch, as a float. Sub-second precision matters
/// for tick pacing and the debounce windows.
pub fn now_secs() -> Result<f64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64())
}

/// A conforming camera id MUST be safe to embed in an MQTT topic path.
///
/// Allowed: "0", "1", "cam_left", "dock-2"
/// Disallowed: anything with whitespace, slashes, or punctuation outside [_-].
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    // Compile once for hot paths.
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,32}$").unwrap());

    let id = camera_id.to_lowercase();
    if !re.is_match(&id) {
        return Err(anyhow!(
            "camera id must match ^[a-z0-9_-]{{1,32}}$, got {:?}",
            camera_id
        ));
    }
    Ok(())
}
