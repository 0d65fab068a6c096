use std::fmt;

use image::{GrayImage, ImageBuffer, Luma, Pixel};
use thiserror::Error;

use crate::types::{LandmarkSet, PixelPos};

/// Parent -> child pairs of the hand skeleton, wrist first.
pub const LANDMARK_LINKS: &[(usize, usize)] = &[
    (0, 1),
    (0, 5),
    (0, 17),
    (1, 2),
    (2, 3),
    (3, 4),
    (5, 6),
    (5, 9),
    (6, 7),
    (7, 8),
    (9, 10),
    (9, 13),
    (10, 11),
    (11, 12),
    (13, 14),
    (13, 17),
    (14, 15),
    (15, 16),
    (17, 18),
    (18, 19),
    (19, 20),
];

pub const SKELETON_INK: Luma<u8> = Luma([255]);

/// Upper bound on the brush radius of [`draw_line`].
pub const MAX_BRUSH_RADIUS: u32 = 256;

/// Single-channel skeleton image fed to the classifier; pixels are 0 or 255.
pub type Raster = GrayImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterShape {
    pub width: u32,
    pub height: u32,
}

impl RasterShape {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RasterizeError {
    #[error("landmarks have zero extent along the {axis} axis")]
    DegenerateGeometry { axis: Axis },
    #[error("raster shape {width}x{height} is too small to draw into")]
    InvalidShape { width: u32, height: u32 },
}

/// Turns a landmark set into the bounding-box-normalized skeleton raster.
#[derive(Clone, Debug)]
pub struct Rasterizer {
    shape: RasterShape,
}

impl Rasterizer {
    pub fn new(shape: RasterShape) -> Self {
        Self { shape }
    }

    pub fn rasterize(&self, landmarks: &LandmarkSet) -> Result<Raster, RasterizeError> {
        rasterize(landmarks, self.shape)
    }
}

pub fn rasterize(landmarks: &LandmarkSet, shape: RasterShape) -> Result<Raster, RasterizeError> {
    let pixels = project_to_raster(landmarks, shape)?;

    let mut raster = GrayImage::new(shape.width, shape.height);
    for &(from, to) in LANDMARK_LINKS {
        if let (Some(&a), Some(&b)) = (pixels.get(from), pixels.get(to)) {
            draw_line(&mut raster, a, b, SKELETON_INK, 1);
        }
    }
    Ok(raster)
}

/// Rescales the hand's bounding box onto `[0, dim - 1]` along each axis
/// independently, truncating to integer pixels.
pub fn project_to_raster(
    landmarks: &LandmarkSet,
    shape: RasterShape,
) -> Result<Vec<PixelPos>, RasterizeError> {
    if shape.width < 2 || shape.height < 2 {
        return Err(RasterizeError::InvalidShape {
            width: shape.width,
            height: shape.height,
        });
    }

    let points = landmarks.points();
    let (min_x, span_x) = axis_extent(points.iter().map(|p| p.x))
        .ok_or(RasterizeError::DegenerateGeometry { axis: Axis::X })?;
    let (min_y, span_y) = axis_extent(points.iter().map(|p| p.y))
        .ok_or(RasterizeError::DegenerateGeometry { axis: Axis::Y })?;

    Ok(points
        .iter()
        .map(|p| {
            PixelPos::new(
                scale_to_pixel(p.x, min_x, span_x, shape.width),
                scale_to_pixel(p.y, min_y, span_y, shape.height),
            )
        })
        .collect())
}

/// `(min, max - min)`, or `None` when the extent is zero or not finite.
fn axis_extent(values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    let (min, max) = values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = max - min;
    if span.is_finite() && span > 0.0 {
        Some((min, span))
    } else {
        None
    }
}

fn scale_to_pixel(value: f32, min: f32, span: f32, dim: u32) -> i32 {
    let max_px = (dim - 1) as i32;
    (((value - min) / span) * max_px as f32).clamp(0.0, max_px as f32) as i32
}

/// Bresenham line stamped with a round brush of `thickness` pixels.
/// Pixels outside the buffer are skipped.
pub fn draw_line<P: Pixel>(
    buffer: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    from: PixelPos,
    to: PixelPos,
    color: P,
    thickness: u32,
) {
    let (mut x0, mut y0) = (from.x, from.y);
    let (x1, y1) = (to.x, to.y);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = brush_radius(thickness);

    loop {
        stamp(buffer, x0, y0, radius, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Radius of the round brush for a stroke `thickness` pixels wide, capped so
/// a stamp never covers more than [`MAX_BRUSH_RADIUS`] pixels either side.
pub fn brush_radius(thickness: u32) -> i32 {
    let radius = (thickness.max(1) - 1) / 2;
    i32::try_from(radius.min(MAX_BRUSH_RADIUS)).unwrap_or(0)
}

/// Filled disc of `radius` pixels around `(cx, cy)`, clipped to the buffer.
pub fn stamp<P: Pixel>(
    buffer: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    cx: i32,
    cy: i32,
    radius: i32,
    color: P,
) {
    let radius = i64::from(radius.max(0));
    let (cx, cy) = (i64::from(cx), i64::from(cy));
    let (w, h) = (i64::from(buffer.width()), i64::from(buffer.height()));
    let r2 = radius * radius;

    for y in (cy - radius).max(0)..=(cy + radius).min(h - 1) {
        for x in (cx - radius).max(0)..=(cx + radius).min(w - 1) {
            let (ox, oy) = (x - cx, y - cy);
            if ox * ox + oy * oy <= r2 {
                buffer.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{NUM_LANDMARKS, Point2D};

    /// Open hand, fingers spread, in normalized image coordinates.
    pub(crate) fn open_palm() -> LandmarkSet {
        let pts = [
            (0.50, 0.90),
            (0.40, 0.82),
            (0.33, 0.74),
            (0.27, 0.66),
            (0.22, 0.58),
            (0.42, 0.60),
            (0.40, 0.45),
            (0.39, 0.36),
            (0.38, 0.28),
            (0.50, 0.58),
            (0.50, 0.42),
            (0.50, 0.32),
            (0.50, 0.22),
            (0.58, 0.60),
            (0.60, 0.46),
            (0.61, 0.37),
            (0.62, 0.30),
            (0.66, 0.64),
            (0.70, 0.54),
            (0.72, 0.47),
            (0.74, 0.41),
        ];
        let points: Vec<Point2D> = pts.iter().map(|&(x, y)| Point2D::new(x, y)).collect();
        LandmarkSet::from_points(&points).unwrap()
    }

    #[test]
    fn projected_points_stay_inside_raster() {
        let shape = RasterShape::new(28, 28);
        let pixels = project_to_raster(&open_palm(), shape).unwrap();
        assert_eq!(pixels.len(), NUM_LANDMARKS);
        for p in &pixels {
            assert!((0..28).contains(&p.x), "x out of range: {p:?}");
            assert!((0..28).contains(&p.y), "y out of range: {p:?}");
        }
        // Bounding box fills the raster on both axes.
        assert_eq!(pixels.iter().map(|p| p.x).min(), Some(0));
        assert_eq!(pixels.iter().map(|p| p.x).max(), Some(27));
        assert_eq!(pixels.iter().map(|p| p.y).min(), Some(0));
        assert_eq!(pixels.iter().map(|p| p.y).max(), Some(27));
    }

    #[test]
    fn rasterize_is_deterministic_and_binary() {
        let shape = RasterShape::new(28, 28);
        let a = rasterize(&open_palm(), shape).unwrap();
        let b = rasterize(&open_palm(), shape).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
        assert_eq!(a.dimensions(), (28, 28));
        assert!(a.as_raw().iter().all(|&v| v == 0 || v == 255));
        assert!(a.as_raw().iter().any(|&v| v == 255));
    }

    #[test]
    fn rasterize_ignores_position_and_scale_of_hand() {
        let shape = RasterShape::new(28, 28);
        let shifted: Vec<Point2D> = open_palm()
            .points()
            .iter()
            .map(|p| Point2D::new(p.x * 0.5 + 0.1, p.y * 0.5 + 0.3))
            .collect();
        let shifted = LandmarkSet::from_points(&shifted).unwrap();

        let a = project_to_raster(&open_palm(), shape).unwrap();
        let b = project_to_raster(&shifted, shape).unwrap();
        let max_delta = a
            .iter()
            .zip(&b)
            .map(|(p, q)| (p.x - q.x).abs().max((p.y - q.y).abs()))
            .max()
            .unwrap();
        // Truncation may shift a pixel by one after float rescaling.
        assert!(max_delta <= 1);
    }

    #[test]
    fn collapsed_landmarks_are_reported_not_divided() {
        let single = LandmarkSet::new([Point2D::new(0.4, 0.4); NUM_LANDMARKS]);
        let err = rasterize(&single, RasterShape::new(28, 28)).unwrap_err();
        assert_eq!(err, RasterizeError::DegenerateGeometry { axis: Axis::X });

        let mut vertical = [Point2D::new(0.4, 0.0); NUM_LANDMARKS];
        for (i, p) in vertical.iter_mut().enumerate() {
            p.y = i as f32 / 20.0;
        }
        let err = rasterize(&LandmarkSet::new(vertical), RasterShape::new(28, 28)).unwrap_err();
        assert_eq!(err, RasterizeError::DegenerateGeometry { axis: Axis::X });
    }

    #[test]
    fn nan_coordinates_are_degenerate() {
        let mut pts = [Point2D::new(0.1, 0.1); NUM_LANDMARKS];
        pts[3] = Point2D::new(f32::NAN, 0.9);
        pts[4] = Point2D::new(0.9, 0.5);
        assert!(rasterize(&LandmarkSet::new(pts), RasterShape::new(28, 28)).is_ok());

        let pts = [Point2D::new(f32::NAN, f32::NAN); NUM_LANDMARKS];
        assert!(matches!(
            rasterize(&LandmarkSet::new(pts), RasterShape::new(28, 28)),
            Err(RasterizeError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn draw_line_covers_both_endpoints() {
        let mut img = GrayImage::new(10, 10);
        draw_line(&mut img, PixelPos::new(1, 1), PixelPos::new(8, 5), SKELETON_INK, 1);
        assert_eq!(img.get_pixel(1, 1), &SKELETON_INK);
        assert_eq!(img.get_pixel(8, 5), &SKELETON_INK);
        assert_eq!(img.get_pixel(8, 1), &Luma([0]));
    }

    #[test]
    fn draw_line_clips_outside_buffer() {
        let mut img = GrayImage::new(4, 4);
        draw_line(&mut img, PixelPos::new(-5, 2), PixelPos::new(10, 2), SKELETON_INK, 3);
        assert!((0..4).all(|x| img.get_pixel(x, 2) == &SKELETON_INK));
    }

    #[test]
    fn brush_radius_saturates_at_both_ends() {
        assert_eq!(brush_radius(0), 0);
        assert_eq!(brush_radius(1), 0);
        assert_eq!(brush_radius(4), 1);
        assert_eq!(brush_radius(u32::MAX), MAX_BRUSH_RADIUS as i32);
    }

    #[test]
    fn huge_thickness_still_inks_the_line() {
        let mut img = GrayImage::new(32, 32);
        draw_line(&mut img, PixelPos::new(4, 4), PixelPos::new(5, 4), SKELETON_INK, u32::MAX);
        assert!(img.pixels().all(|px| px == &SKELETON_INK));

        let mut img = GrayImage::new(200, 200);
        draw_line(&mut img, PixelPos::new(100, 100), PixelPos::new(101, 100), SKELETON_INK, 100_000);
        assert_eq!(img.get_pixel(0, 0), &SKELETON_INK);
        assert_eq!(img.get_pixel(199, 199), &SKELETON_INK);
    }
}
