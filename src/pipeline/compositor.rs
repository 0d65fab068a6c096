use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;

use super::skeleton::draw_line;
use crate::{
    config::CanvasConfig,
    types::{LandmarkSet, PixelPos, StrokeColor},
};

/// Widest stroke a session may ask for.
pub const MAX_STROKE_THICKNESS: u32 = 64;

/// One line drawn onto the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub from: PixelPos,
    pub to: PixelPos,
    pub color: StrokeColor,
    pub thickness: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeUpdate {
    /// First point of a stroke: stored, nothing drawn.
    PenDown(PixelPos),
    Drawn(Segment),
    /// Frame had no hand; canvas and pen position untouched.
    Held,
}

/// Per-session ink canvas and pen.
#[derive(Clone, Debug)]
pub struct SketchState {
    canvas: RgbImage,
    previous: Option<PixelPos>,
    color: StrokeColor,
    thickness: u32,
}

impl SketchState {
    pub fn new(config: &CanvasConfig) -> Self {
        Self {
            canvas: RgbImage::new(config.width, config.height),
            previous: None,
            color: config.color,
            thickness: config.thickness.clamp(1, MAX_STROKE_THICKNESS),
        }
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    pub fn previous_position(&self) -> Option<PixelPos> {
        self.previous
    }

    pub fn color(&self) -> StrokeColor {
        self.color
    }

    pub fn thickness(&self) -> u32 {
        self.thickness
    }

    /// Takes effect on the next segment; the stroke continues.
    pub fn set_color(&mut self, color: StrokeColor) {
        self.color = color;
    }

    /// Takes effect on the next segment; the stroke continues. Clamped to
    /// `1..=MAX_STROKE_THICKNESS`.
    pub fn set_thickness(&mut self, thickness: u32) {
        self.thickness = thickness.clamp(1, MAX_STROKE_THICKNESS);
    }

    /// Pen-up: the next point starts a new stroke.
    pub fn reset_stroke(&mut self) {
        self.previous = None;
    }

    pub fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|px| *px = Rgb([0, 0, 0]));
        self.reset_stroke();
    }

    /// Fingertip of `landmarks` in canvas pixel coordinates.
    pub fn fingertip_position(&self, landmarks: &LandmarkSet) -> PixelPos {
        landmarks
            .pointing_fingertip()
            .denormalize(self.canvas.width(), self.canvas.height())
    }

    /// Extends the current stroke to `position`, or starts one.
    pub fn draw_to(&mut self, position: PixelPos) -> StrokeUpdate {
        let update = match self.previous {
            Some(from) => {
                let segment = Segment {
                    from,
                    to: position,
                    color: self.color,
                    thickness: self.thickness,
                };
                draw_line(
                    &mut self.canvas,
                    from,
                    position,
                    Rgb(self.color.0),
                    self.thickness,
                );
                StrokeUpdate::Drawn(segment)
            }
            None => StrokeUpdate::PenDown(position),
        };
        self.previous = Some(position);
        update
    }

    /// Paint-mode entry point for one frame's detection result. A missing
    /// hand is a dropped frame, not a pen-up.
    pub fn apply_detection(&mut self, landmarks: Option<&LandmarkSet>) -> StrokeUpdate {
        match landmarks {
            Some(landmarks) => {
                let position = self.fingertip_position(landmarks);
                self.draw_to(position)
            }
            None => StrokeUpdate::Held,
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode canvas as png")?;
        Ok(bytes)
    }
}
