use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};

pub const NUM_LANDMARKS: usize = 21;
/// Landmark the paint mode follows.
pub const POINTING_FINGERTIP: usize = 7;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// Keypoint normalized to `[0, 1]` relative to the source image size.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Scales into pixel space of a `width`x`height` buffer, truncating.
    pub fn denormalize(&self, width: u32, height: u32) -> PixelPos {
        PixelPos {
            x: (self.x * width as f32) as i32,
            y: (self.y * height as f32) as i32,
        }
    }
}

/// One detected hand: exactly [`NUM_LANDMARKS`] points in the fixed
/// wrist-first anatomical order.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Point2D; NUM_LANDMARKS],
}

impl LandmarkSet {
    pub fn new(points: [Point2D; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Returns `None` unless `points` holds exactly one hand's worth.
    pub fn from_points(points: &[Point2D]) -> Option<Self> {
        let points: [Point2D; NUM_LANDMARKS] = points.try_into().ok()?;
        Some(Self { points })
    }

    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    pub fn pointing_fingertip(&self) -> Point2D {
        self.points[POINTING_FINGERTIP]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: i32,
    pub y: i32,
}

impl PixelPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeColor(pub [u8; 3]);

impl Default for StrokeColor {
    fn default() -> Self {
        StrokeColor([255, 0, 0])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureLabel {
    Finger,
    Fist,
    Palm,
    Peace,
}

impl GestureLabel {
    /// Output order of the classifier's logits.
    pub const ALL: [GestureLabel; 4] = [
        GestureLabel::Finger,
        GestureLabel::Fist,
        GestureLabel::Palm,
        GestureLabel::Peace,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::Finger => "finger",
            GestureLabel::Fist => "fist",
            GestureLabel::Palm => "palm",
            GestureLabel::Peace => "peace",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            GestureLabel::Finger => "☝️ ",
            GestureLabel::Fist => "✊ ",
            GestureLabel::Palm => "🖐 ",
            GestureLabel::Peace => "✌️ ",
        }
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Gesture,
    #[default]
    Paint,
}

impl OperatingMode {
    pub fn label(&self) -> &'static str {
        match self {
            OperatingMode::Gesture => "gesture",
            OperatingMode::Paint => "paint",
        }
    }
}
