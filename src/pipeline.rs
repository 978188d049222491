//! The main processing loop.
//!
//! One scheduler drives both cameras: each tick it takes whatever frame
//! each source currently has, runs detection, feeds the per-camera
//! presence tracker and the shared log buffer, and publishes alerts,
//! annotated stream frames, and flushed log batches. Cameras are
//! processed independently - a disconnected camera skips its slice of the
//! tick and never stalls the other one.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, ConnectionStatus};
use crate::detect::{BoundingBox, DetectionEngine};
use crate::logbuf::{DetectionLogBuffer, DetectionRecord};
use crate::presence::{PresenceStatus, PresenceTracker};
use crate::publish::{stream_topic, AlertPublisher, Payload, QosLevel, TOPIC_ALERT, TOPIC_DETECTION_LOG};
use crate::stream;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Scheduler tuning. Defaults match the deployed constants.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Target tick rate in Hz.
    pub tick_hz: f64,
    /// Continuous absence before PERSON_GONE, seconds.
    pub grace_period_secs: f64,
    /// Detection silence before a log flush, seconds.
    pub quiet_period_secs: f64,
    /// Publish annotated JPEG frames per camera.
    pub stream_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_hz: 20.0,
            grace_period_secs: crate::presence::DEFAULT_GRACE_PERIOD_SECS,
            quiet_period_secs: crate::logbuf::DEFAULT_QUIET_PERIOD_SECS,
            stream_enabled: true,
        }
    }
}

/// Structured alert payload published on the alert topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertEvent {
    pub event: String,
    pub camera_id: String,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// Point-in-time snapshot of one camera's runtime record, assembled from
/// the capture-owned and tracker-owned halves for health logging. The two
/// halves never share a lock.
#[derive(Clone, Debug)]
pub struct CameraState {
    pub id: String,
    pub connection_status: ConnectionStatus,
    pub last_frame_time: Option<f64>,
    pub presence_status: PresenceStatus,
    pub last_person_seen_time: Option<f64>,
}

struct CameraSlot {
    source: CaptureSource,
    tracker: PresenceTracker,
}

pub struct PipelineScheduler {
    cameras: Vec<CameraSlot>,
    engine: DetectionEngine,
    logbuf: DetectionLogBuffer,
    publisher: Box<dyn AlertPublisher>,
    /// Timestamp of the most recent detection on either camera; gates the
    /// log flush.
    last_detection_time: f64,
    tick_interval: Duration,
    stream_enabled: bool,
}

impl PipelineScheduler {
    pub fn new(
        cameras: Vec<CaptureSource>,
        engine: DetectionEngine,
        publisher: Box<dyn AlertPublisher>,
        config: PipelineConfig,
    ) -> Self {
        let tick_interval = Duration::from_secs_f64(1.0 / config.tick_hz.max(1.0));
        let cameras = cameras
            .into_iter()
            .map(|source| CameraSlot {
                source,
                tracker: PresenceTracker::new(config.grace_period_secs),
            })
            .collect();
        Self {
            cameras,
            engine,
            logbuf: DetectionLogBuffer::new(config.quiet_period_secs),
            publisher,
            last_detection_time: 0.0,
            tick_interval,
            stream_enabled: config.stream_enabled,
        }
    }

    /// Run until the shutdown flag is raised. Both cameras are stopped and
    /// the publisher disconnected on every exit path.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if !self.publisher.connect() {
            log::warn!("transport not connected; alerts will drop until the broker returns");
        }
        for slot in &mut self.cameras {
            slot.source.start();
        }

        let result = self.run_loop(shutdown);
        self.shutdown_all();
        result
    }

    fn run_loop(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::Acquire) {
            let tick_start = Instant::now();
            let now = crate::now_secs()?;
            self.tick(now);

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }

            // Sleep the remainder of the tick, clamped at zero when
            // processing overran.
            let elapsed = tick_start.elapsed();
            if elapsed < self.tick_interval {
                std::thread::sleep(self.tick_interval - elapsed);
            }
        }
        log::info!("shutdown requested");
        Ok(())
    }

    /// One scheduler iteration at time `now`.
    ///
    /// Public at the crate level so tests can drive a synthetic clock
    /// through the full detection / debounce / flush path.
    pub fn tick(&mut self, now: f64) {
        for i in 0..self.cameras.len() {
            self.tick_camera(i, now);
        }

        if let Some(batch) = self.logbuf.maybe_flush(now, self.last_detection_time) {
            log::info!(
                "flushing detection log: {} records up to {:.3}",
                batch.record_count(),
                batch.period_end
            );
            match serde_json::to_string(&batch) {
                Ok(json) => {
                    self.publisher.publish(
                        TOPIC_DETECTION_LOG,
                        Payload::Structured(json),
                        QosLevel::AtLeastOnce,
                    );
                }
                Err(e) => log::error!("failed to serialize log batch: {}", e),
            }
        }
    }

    fn tick_camera(&mut self, index: usize, now: f64) {
        let slot = &mut self.cameras[index];
        // No frame means no signal (still connecting, or disconnected).
        // Skip this camera for the tick; presence state is frozen rather
        // than aged out, so signal loss is not mistaken for an empty room.
        let Some(frame) = slot.source.read() else {
            return;
        };

        let camera_id = slot.source.id().to_string();
        let (model_dets, _backend) = self.engine.detect(&frame);
        let detections: Vec<_> = model_dets
            .iter()
            .map(|d| self.engine.rescale_to_frame(d, frame.width, frame.height))
            .collect();

        let person_seen = !detections.is_empty();
        if person_seen {
            self.last_detection_time = now;
            for det in &detections {
                self.logbuf.append(
                    &camera_id,
                    DetectionRecord {
                        timestamp: now,
                        confidence: det.score,
                        bbox: det.bbox,
                        camera_id: camera_id.clone(),
                    },
                );
            }
        }

        let slot = &mut self.cameras[index];
        if let Some(event) = slot.tracker.update(now, person_seen) {
            let primary = detections.first();
            log::info!(
                "[camera {}] {} (confidence {:?})",
                camera_id,
                event.as_str(),
                primary.map(|d| d.score)
            );
            let alert = AlertEvent {
                event: event.as_str().to_string(),
                camera_id: camera_id.clone(),
                timestamp: now,
                confidence: primary.map(|d| d.score),
                bbox: primary.map(|d| d.bbox),
            };
            match serde_json::to_string(&alert) {
                Ok(json) => {
                    self.publisher.publish(
                        TOPIC_ALERT,
                        Payload::Structured(json),
                        QosLevel::AtLeastOnce,
                    );
                }
                Err(e) => log::error!("failed to serialize alert: {}", e),
            }
        }

        if self.stream_enabled {
            match stream::annotate_and_encode(&frame, detections.first()) {
                Ok(jpeg) => {
                    self.publisher.publish(
                        &stream_topic(&camera_id),
                        Payload::Binary(jpeg),
                        QosLevel::AtMostOnce,
                    );
                }
                Err(e) => log::warn!("[camera {}] stream encode failed: {}", camera_id, e),
            }
        }
    }

    /// Per-camera runtime snapshots.
    pub fn camera_states(&self) -> Vec<CameraState> {
        self.cameras
            .iter()
            .map(|slot| CameraState {
                id: slot.source.id().to_string(),
                connection_status: slot.source.status(),
                last_frame_time: slot.source.last_frame_time(),
                presence_status: slot.tracker.status(),
                last_person_seen_time: slot.tracker.last_person_seen_time(),
            })
            .collect()
    }

    fn log_health(&self) {
        for slot in &self.cameras {
            let stats = slot.source.stats();
            log::info!(
                "[camera {}] status={:?} presence={:?} frames={} device={}",
                slot.source.id(),
                slot.source.status(),
                slot.tracker.status(),
                stats.frames_captured,
                stats.device
            );
        }
    }

    fn shutdown_all(&mut self) {
        for slot in &mut self.cameras {
            slot.source.stop();
        }
        self.publisher.disconnect();
        log::info!("pipeline stopped");
    }
}
