use std::path::Path;

use anyhow::{Context, Result, bail};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use super::{
    LandmarkDetector,
    common::{INPUT_SIZE, landmarks_from_output, letterbox_tensor},
};
use crate::types::{Frame, LandmarkSet};

/// MediaPipe handpose estimator applied to the whole letterboxed frame.
///
/// Output 0 holds the 21 landmarks, output 1 (when present) the hand presence
/// score.
pub struct OrtHandDetector {
    session: Session,
    threshold: f32,
}

impl OrtHandDetector {
    pub fn new(model_path: &Path, threshold: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load handpose model from {}", model_path.display()))?;
        log::info!("loaded handpose model from {}", model_path.display());

        Ok(Self { session, threshold })
    }
}

impl LandmarkDetector for OrtHandDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        let (input, letterbox) = letterbox_tensor(frame, INPUT_SIZE)?;
        let outputs = self
            .session
            .run(ort::inputs![Tensor::from_array(input)?])
            .context("handpose inference failed")?;
        if outputs.len() == 0 {
            bail!("handpose model produced no outputs");
        }

        let score = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|scores| scores.iter().next().copied())
                .map_or(0.0, |score| score.clamp(0.0, 1.0))
        } else {
            0.0
        };
        if score < self.threshold {
            log::trace!("hand presence {score:.2} below {:.2}", self.threshold);
            return Ok(None);
        }

        let flat: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        landmarks_from_output(&flat, &letterbox).map(Some)
    }
}
