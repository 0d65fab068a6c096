pub mod common;
mod ort;

pub use self::ort::OrtHandDetector;

use crate::types::{Frame, LandmarkSet};

/// Finds at most one hand in a decoded frame.
pub trait LandmarkDetector: Send + 'static {
    /// `Ok(None)` when no hand is visible.
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<LandmarkSet>>;
}
