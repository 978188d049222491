//! Detection log batching.
//!
//! A person walking past a camera produces a burst of per-frame records
//! (tens per second). The buffer accumulates them across both cameras and
//! releases one batch after a quiet period with no new detections, so
//! each presence episode becomes a single log artifact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detect::BoundingBox;

/// No-new-detections window required before a flush, in seconds.
pub const DEFAULT_QUIET_PERIOD_SECS: f64 = 5.0;

/// One detection, immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: f64,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub camera_id: String,
}

/// A flushed batch, handed to the publisher and then discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogBatch {
    /// End of the covered detection period, epoch seconds. Field name is
    /// a wire convention consumed by the log-saving listener.
    #[serde(rename = "detection_period_end")]
    pub period_end: f64,
    pub records_by_camera: BTreeMap<String, Vec<DetectionRecord>>,
}

impl LogBatch {
    pub fn record_count(&self) -> usize {
        self.records_by_camera.values().map(Vec::len).sum()
    }
}

/// In-memory per-camera record accumulator with a quiet-period flush.
pub struct DetectionLogBuffer {
    records: BTreeMap<String, Vec<DetectionRecord>>,
    quiet_period: f64,
}

impl DetectionLogBuffer {
    pub fn new(quiet_period_secs: f64) -> Self {
        Self {
            records: BTreeMap::new(),
            quiet_period: quiet_period_secs,
        }
    }

    pub fn append(&mut self, camera_id: &str, record: DetectionRecord) {
        self.records
            .entry(camera_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.values().all(Vec::is_empty)
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Flush iff detections have happened (`last_detection_time > 0`), the
    /// quiet period has elapsed since the last one, and something is
    /// buffered. The buffer is cleared atomically with batch creation, so
    /// at most one batch is ever in flight.
    pub fn maybe_flush(&mut self, now: f64, last_detection_time: f64) -> Option<LogBatch> {
        if last_detection_time <= 0.0 {
            return None;
        }
        if now - last_detection_time <= self.quiet_period {
            return None;
        }
        if self.is_empty() {
            return None;
        }
        let records_by_camera = std::mem::take(&mut self.records);
        Some(LogBatch {
            period_end: now,
            records_by_camera,
        })
    }
}
