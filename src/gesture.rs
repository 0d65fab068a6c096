use std::{cmp::Ordering, path::Path};

use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::RecognitionConfig,
    pipeline::skeleton::Raster,
    types::GestureLabel,
};

const NUM_CLASSES: usize = GestureLabel::ALL.len();

/// Forward pass of the frozen gesture network: NCHW tensor in, logits out.
pub trait GestureModel: Send + 'static {
    fn forward(&mut self, input: Array4<f32>) -> Result<Vec<f32>>;
}

/// Convolutional classifier exported to ONNX.
pub struct OrtGestureModel {
    session: Session,
}

impl OrtGestureModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load gesture classifier from {}",
                    model_path.display()
                )
            })?;

        log::info!(
            "loaded gesture classification model from {}",
            model_path.display()
        );
        Ok(Self { session })
    }
}

impl GestureModel for OrtGestureModel {
    fn forward(&mut self, input: Array4<f32>) -> Result<Vec<f32>> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("gesture model inference failed")?;
        if outputs.len() < 1 {
            return Err(anyhow!("gesture model returned no outputs"));
        }
        let logits = outputs[0].try_extract_array::<f32>()?;
        Ok(logits.iter().copied().collect())
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("raster is {got_w}x{got_h}, classifier expects {want_w}x{want_h}")]
    RasterShape {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("model produced {0} logits, expected 4")]
    LogitCount(usize),
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub label: GestureLabel,
    /// Softmax over the logits, in [`GestureLabel::ALL`] order.
    pub probabilities: [f32; NUM_CLASSES],
}

pub struct GestureClassifier {
    model: Box<dyn GestureModel>,
    config: RecognitionConfig,
}

impl GestureClassifier {
    pub fn new(model: Box<dyn GestureModel>, config: RecognitionConfig) -> Self {
        Self { model, config }
    }

    pub fn classify(&mut self, raster: &Raster) -> Result<Classification, ClassifyError> {
        let (w, h) = raster.dimensions();
        if w != self.config.raster_width || h != self.config.raster_height {
            return Err(ClassifyError::RasterShape {
                got_w: w,
                got_h: h,
                want_w: self.config.raster_width,
                want_h: self.config.raster_height,
            });
        }

        let input = raster_to_tensor(raster, &self.config);
        let logits = self.model.forward(input).map_err(ClassifyError::Inference)?;
        if logits.len() != NUM_CLASSES {
            return Err(ClassifyError::LogitCount(logits.len()));
        }

        let probs = softmax(&logits);
        let mut probabilities = [0.0; NUM_CLASSES];
        probabilities.copy_from_slice(&probs);

        let label = GestureLabel::from_index(argmax(&probabilities))
            .ok_or(ClassifyError::LogitCount(logits.len()))?;

        Ok(Classification {
            label,
            probabilities,
        })
    }
}

/// `[1, 1, H, W]` tensor of `(pixel / 255 - mean) / std`.
pub fn raster_to_tensor(raster: &Raster, config: &RecognitionConfig) -> Array4<f32> {
    let (w, h) = raster.dimensions();
    Array4::from_shape_fn((1, 1, h as usize, w as usize), |(_, _, y, x)| {
        let v = raster.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0;
        (v - config.normalize_mean) / config.normalize_std
    })
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (idx, &v)| {
            match v.partial_cmp(&best_v) {
                Some(Ordering::Greater) => (idx, v),
                _ => (best, best_v),
            }
        })
        .0
}
