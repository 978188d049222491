use anyhow::{anyhow, Result};

use crate::detect::backend::{BackendKind, InferenceBackend, RawDetection, PERSON_CLASS_ID};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Fixed model input resolution (square). Frames are resized to this
/// before inference; returned boxes live in this space until rescaled.
pub const MODEL_INPUT_DIM: u32 = 300;

/// Person detector with accelerator-to-CPU failover.
///
/// Every call tries the accelerator backend first unless it has ever
/// errored during inference, in which case it is marked failed for the
/// rest of the process lifetime and all calls route to the CPU backend.
/// Accelerator faults are typically hardware-level and do not recover
/// within a process, so there is no re-probe.
pub struct DetectionEngine {
    accelerator: Option<Box<dyn InferenceBackend>>,
    cpu: Option<Box<dyn InferenceBackend>>,
    accelerator_failed: bool,
    threshold: f32,
}

impl DetectionEngine {
    /// Build the engine from whatever backend handles the model loader
    /// managed to initialize. Having neither is a deployment error, not a
    /// runtime one: fail fast instead of starting a watcher that can
    /// never detect anything.
    pub fn new(
        accelerator: Option<Box<dyn InferenceBackend>>,
        cpu: Option<Box<dyn InferenceBackend>>,
        threshold: f32,
    ) -> Result<Self> {
        if accelerator.is_none() && cpu.is_none() {
            return Err(anyhow!(
                "no inference backend available (accelerator and CPU both failed to initialize)"
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("confidence threshold must be in [0, 1]"));
        }
        Ok(Self {
            accelerator,
            cpu,
            accelerator_failed: false,
            threshold,
        })
    }

    /// Run person detection on one frame.
    ///
    /// Returned boxes are in model input space; callers MUST rescale via
    /// `rescale_to_frame` before using them against the original frame.
    ///
    /// Never errors: an accelerator fault triggers the permanent failover,
    /// a CPU fault degrades to an empty result for this call, and with no
    /// backend at all the result is empty with `BackendKind::None` so the
    /// scheduler keeps running in a no-detection mode.
    pub fn detect(&mut self, frame: &Frame) -> (Vec<Detection>, BackendKind) {
        let resized = frame.resized(MODEL_INPUT_DIM, MODEL_INPUT_DIM);

        if !self.accelerator_failed {
            if let Some(backend) = self.accelerator.as_mut() {
                match run_backend(backend.as_mut(), &resized) {
                    Ok(raw) => return (self.keep_persons(raw), BackendKind::Accelerator),
                    Err(e) => {
                        self.accelerator_failed = true;
                        log::warn!(
                            "accelerator backend '{}' failed, switching to CPU for the rest of \
                             this process: {}",
                            backend.name(),
                            e
                        );
                    }
                }
            } else {
                self.accelerator_failed = true;
            }
        }

        if let Some(backend) = self.cpu.as_mut() {
            match run_backend(backend.as_mut(), &resized) {
                Ok(raw) => return (self.keep_persons(raw), BackendKind::Cpu),
                Err(e) => {
                    log::warn!("cpu backend '{}' inference failed: {}", backend.name(), e);
                    return (Vec::new(), BackendKind::Cpu);
                }
            }
        }

        (Vec::new(), BackendKind::None)
    }

    /// Rescale a model-space detection into original frame coordinates.
    /// Required post-condition for every `detect` caller.
    pub fn rescale_to_frame(&self, det: &Detection, frame_width: u32, frame_height: u32) -> Detection {
        let scale_x = frame_width as f32 / MODEL_INPUT_DIM as f32;
        let scale_y = frame_height as f32 / MODEL_INPUT_DIM as f32;
        Detection {
            bbox: crate::detect::result::BoundingBox::new(
                (det.bbox.x as f32 * scale_x) as i32,
                (det.bbox.y as f32 * scale_y) as i32,
                (det.bbox.w as f32 * scale_x) as i32,
                (det.bbox.h as f32 * scale_y) as i32,
            ),
            score: det.score,
        }
    }

    /// True once the accelerator has been marked failed.
    pub fn accelerator_failed(&self) -> bool {
        self.accelerator_failed
    }

    fn keep_persons(&self, raw: Vec<RawDetection>) -> Vec<Detection> {
        raw.into_iter()
            .filter(|d| d.class_id == PERSON_CLASS_ID && d.score > self.threshold)
            .map(|d| Detection {
                bbox: d.bbox,
                score: d.score,
            })
            .collect()
    }
}

fn run_backend(backend: &mut dyn InferenceBackend, frame: &Frame) -> Result<Vec<RawDetection>> {
    backend.set_input(frame)?;
    backend.invoke()?;
    backend.get_outputs()
}
