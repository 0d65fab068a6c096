use anyhow::{Context, Result, ensure};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, LandmarkSet, NUM_LANDMARKS, Point2D};

/// Side of the square handpose input.
pub const INPUT_SIZE: u32 = 224;

/// How a source frame was scaled and centred inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub fitted_w: u32,
    pub fitted_h: u32,
    pub source_w: u32,
    pub source_h: u32,
}

impl Letterbox {
    pub fn fit(source_w: u32, source_h: u32, side: u32) -> Self {
        let scale = side as f32 / source_w.max(source_h).max(1) as f32;
        let fitted = |len: u32| ((len as f32 * scale).round() as u32).clamp(1, side);
        let fitted_w = fitted(source_w);
        let fitted_h = fitted(source_h);
        Self {
            scale,
            offset_x: (side - fitted_w) / 2,
            offset_y: (side - fitted_h) / 2,
            fitted_w,
            fitted_h,
            source_w,
            source_h,
        }
    }

    /// Model-input pixel coordinates to a fraction of the source frame.
    pub fn to_source_fraction(&self, x: f32, y: f32) -> Point2D {
        let max_x = self.source_w.saturating_sub(1) as f32;
        let max_y = self.source_h.saturating_sub(1) as f32;
        let sx = ((x - self.offset_x as f32) / self.scale).clamp(0.0, max_x);
        let sy = ((y - self.offset_y as f32) / self.scale).clamp(0.0, max_y);
        Point2D::new(sx / self.source_w.max(1) as f32, sy / self.source_h.max(1) as f32)
    }
}

/// Letterboxes `frame` into a `side`x`side` NHWC tensor with channels in `[0, 1]`.
pub fn letterbox_tensor(frame: &Frame, side: u32) -> Result<(Array4<f32>, Letterbox)> {
    let expected = frame.width as usize * frame.height as usize * 4;
    ensure!(
        frame.rgba.len() == expected,
        "frame holds {} bytes, {}x{} RGBA needs {expected}",
        frame.rgba.len(),
        frame.width,
        frame.height
    );

    let letterbox = Letterbox::fit(frame.width, frame.height, side);
    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut fitted = fir::images::Image::new(letterbox.fitted_w, letterbox.fitted_h, fir::PixelType::U8x4);
    fir::Resizer::new()
        .resize(
            &src,
            &mut fitted,
            Some(&fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear))),
        )
        .context("letterbox resize failed")?;

    let side = side as usize;
    let mut padded = vec![0u8; side * side * 4];
    let row_bytes = letterbox.fitted_w as usize * 4;
    for (row, line) in fitted.buffer().chunks_exact(row_bytes).enumerate() {
        let start = ((letterbox.offset_y as usize + row) * side + letterbox.offset_x as usize) * 4;
        padded[start..start + row_bytes].copy_from_slice(line);
    }

    let rgb: Vec<f32> = padded
        .par_chunks_exact(4)
        .flat_map_iter(|px| px[..3].iter().map(|&c| c as f32 / 255.0).collect::<Vec<_>>())
        .collect();
    let tensor = Array4::from_shape_vec((1, side, side, 3), rgb).context("letterbox tensor shape")?;
    Ok((tensor, letterbox))
}

/// Reads 21 `(x, y, z)` triples in model-input pixels and maps them back onto
/// the source frame. Depth is discarded.
pub fn landmarks_from_output(flat: &[f32], letterbox: &Letterbox) -> Result<LandmarkSet> {
    ensure!(
        flat.len() >= NUM_LANDMARKS * 3,
        "handpose output has {} values, need {}",
        flat.len(),
        NUM_LANDMARKS * 3
    );
    let points: Vec<Point2D> = flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|xyz| letterbox.to_source_fraction(xyz[0], xyz[1]))
        .collect();
    LandmarkSet::from_points(&points).context("handpose output is not a full hand")
}
