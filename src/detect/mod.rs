mod backend;
mod backends;
mod engine;
mod result;

pub use backend::{BackendKind, InferenceBackend, RawDetection, PERSON_CLASS_ID};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{DetectionEngine, MODEL_INPUT_DIM};
pub use result::{BoundingBox, Detection};
