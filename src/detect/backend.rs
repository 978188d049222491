use anyhow::Result;

use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// COCO class index for "person"; the only class this pipeline keeps.
pub const PERSON_CLASS_ID: u32 = 0;

/// Which backend produced a detection result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Accelerator,
    Cpu,
    None,
}

/// A detection as emitted by a backend, before unification.
///
/// Coordinates are pixels in the model input space; the class id follows
/// the model's label map. Backends do not filter or rescale - that is the
/// engine's job, so adapters stay dumb.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub class_id: u32,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Inference backend handle.
///
/// Handles are supplied by a model-loading collaborator and follow the
/// set-input / invoke / get-outputs call sequence. The frame passed to
/// `set_input` is already resized to the model's fixed input resolution.
///
/// Implementations must treat the frame as read-only and must not retain
/// it beyond the call.
pub trait InferenceBackend: Send {
    /// Backend identifier for log lines.
    fn name(&self) -> &'static str;

    /// Stage the input tensor for the next `invoke`.
    fn set_input(&mut self, frame: &Frame) -> Result<()>;

    /// Run inference on the staged input.
    fn invoke(&mut self) -> Result<()>;

    /// Detections from the last successful `invoke`.
    fn get_outputs(&mut self) -> Result<Vec<RawDetection>>;
}
