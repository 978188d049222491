use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, RawDetection, PERSON_CLASS_ID};
use crate::detect::engine::MODEL_INPUT_DIM;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Intensity change a stub detection requires, in mean-pixel units.
const MEAN_DELTA: f32 = 8.0;

/// Stub backend for model-less deployments and tests.
///
/// Compares each frame's mean intensity against the previous one and
/// reports a single centered "person" when the scene changed enough.
/// Useful for exercising the full pipeline with no model files on disk.
pub struct StubBackend {
    last_mean: Option<f32>,
    pending: Vec<RawDetection>,
    staged_mean: Option<f32>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            last_mean: None,
            pending: Vec::new(),
            staged_mean: None,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn set_input(&mut self, frame: &Frame) -> Result<()> {
        if frame.pixels.is_empty() {
            return Err(anyhow!("empty frame"));
        }
        let sum: u64 = frame.pixels.iter().map(|&p| p as u64).sum();
        self.staged_mean = Some(sum as f32 / frame.pixels.len() as f32);
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let mean = self
            .staged_mean
            .take()
            .ok_or_else(|| anyhow!("invoke before set_input"))?;

        let changed = self
            .last_mean
            .is_some_and(|prev| (prev - mean).abs() > MEAN_DELTA);
        self.last_mean = Some(mean);

        self.pending.clear();
        if changed {
            let quarter = (MODEL_INPUT_DIM / 4) as i32;
            self.pending.push(RawDetection {
                class_id: PERSON_CLASS_ID,
                score: 0.85,
                bbox: BoundingBox::new(quarter, quarter, 2 * quarter, 2 * quarter),
            });
        }
        Ok(())
    }

    fn get_outputs(&mut self) -> Result<Vec<RawDetection>> {
        Ok(self.pending.clone())
    }
}
