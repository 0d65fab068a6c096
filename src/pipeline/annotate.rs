use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};

use super::skeleton::{LANDMARK_LINKS, draw_line, stamp};
use crate::types::{Frame, LandmarkSet, PixelPos};

pub const LINK_COLOR: Rgba<u8> = Rgba([56, 189, 248, 255]);
pub const JOINT_COLOR: Rgba<u8> = Rgba([248, 113, 113, 255]);
const LINK_THICKNESS: u32 = 3;
const JOINT_RADIUS: i32 = 3;

/// Draws the hand's links, then a dot on every joint, in `image` pixels.
pub fn draw_landmarks(image: &mut RgbaImage, landmarks: &LandmarkSet) {
    let (width, height) = image.dimensions();
    let joints: Vec<PixelPos> = landmarks
        .points()
        .iter()
        .map(|p| p.denormalize(width, height))
        .collect();

    for &(from, to) in LANDMARK_LINKS {
        if let (Some(&a), Some(&b)) = (joints.get(from), joints.get(to)) {
            draw_line(image, a, b, LINK_COLOR, LINK_THICKNESS);
        }
    }
    for joint in &joints {
        stamp(image, joint.x, joint.y, JOINT_RADIUS, JOINT_COLOR);
    }
}

/// The decoded frame as PNG, with the hand overlaid when one was found.
pub fn annotate_frame(frame: &Frame, landmarks: Option<&LandmarkSet>) -> Result<Vec<u8>> {
    let mut image = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .context("frame buffer does not match its dimensions")?;
    if let Some(landmarks) = landmarks {
        draw_landmarks(&mut image, landmarks);
    }

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode annotated frame")?;
    Ok(bytes)
}
