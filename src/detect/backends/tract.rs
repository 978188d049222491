#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, RawDetection};
use crate::detect::engine::MODEL_INPUT_DIM;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Tract-based CPU backend for ONNX person-detection models.
///
/// Expects an SSD-style single-channel model: input `1x1xHxW` f32 in
/// [0, 1], outputs `[boxes (1,N,4 as ymin,xmin,ymax,xmax normalized),
/// classes (1,N), scores (1,N)]`. This backend loads a local model file
/// and performs no network I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_dim: u32,
    staged: Option<Tensor>,
    outputs: Vec<RawDetection>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_dim = MODEL_INPUT_DIM;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 1, input_dim as usize, input_dim as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_dim,
            staged: None,
            outputs: Vec::new(),
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.input_dim || frame.height != self.input_dim {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.input_dim,
                self.input_dim
            ));
        }

        let dim = self.input_dim as usize;
        let input =
            tract_ndarray::Array4::from_shape_fn((1, 1, dim, dim), |(_, _, y, x)| {
                frame.pixels[y * dim + x] as f32 / 255.0
            });
        Ok(input.into_tensor())
    }

    fn parse_outputs(&self, outputs: TVec<Tensor>) -> Result<Vec<RawDetection>> {
        if outputs.len() < 3 {
            return Err(anyhow!(
                "model produced {} outputs, expected boxes/classes/scores",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes output was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output was not f32")?;

        let boxes = boxes
            .to_shape((boxes.len() / 4, 4))
            .context("boxes output shape")?;
        let classes = classes.iter().cloned().collect::<Vec<_>>();
        let scores = scores.iter().cloned().collect::<Vec<_>>();

        let dim = self.input_dim as f32;
        let mut detections = Vec::new();
        for (i, score) in scores.iter().enumerate() {
            let Some(&class) = classes.get(i) else {
                break;
            };
            let row = boxes.row(i);
            let (ymin, xmin, ymax, xmax) = (row[0], row[1], row[2], row[3]);
            detections.push(RawDetection {
                class_id: class as u32,
                score: *score,
                bbox: BoundingBox::new(
                    (xmin * dim) as i32,
                    (ymin * dim) as i32,
                    ((xmax - xmin) * dim) as i32,
                    ((ymax - ymin) * dim) as i32,
                ),
            });
        }
        Ok(detections)
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn set_input(&mut self, frame: &Frame) -> Result<()> {
        self.staged = Some(self.build_input(frame)?);
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let input = self
            .staged
            .take()
            .ok_or_else(|| anyhow!("invoke before set_input"))?;
        let raw = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let raw = raw.into_iter().map(|t| t.into_tensor()).collect();
        self.outputs = self.parse_outputs(raw)?;
        Ok(())
    }

    fn get_outputs(&mut self) -> Result<Vec<RawDetection>> {
        Ok(self.outputs.clone())
    }
}
