use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    model_download::{default_classifier_model_path, default_handpose_model_path},
    pipeline::{compositor::MAX_STROKE_THICKNESS, skeleton::RasterShape},
    types::{OperatingMode, StrokeColor},
};

pub const DEFAULT_CONFIG_FILE: &str = "virtual-paint.toml";

/// Version of the raster/normalization contract the classifier was trained
/// against. Bump together with the checkpoint.
pub const RECOGNITION_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub canvas: CanvasConfig,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// WebSocket upgrade path clients must request.
    pub path: String,
    /// Payloads shorter than this are rejected before decoding.
    pub min_payload_len: usize,
    pub default_mode: OperatingMode,
    pub paint_response: PaintResponse,
    /// Send the decoded frame with the hand drawn on it after every result.
    /// Sessions can toggle this with `set_annotate`.
    pub annotate: bool,
    /// Upper bound on frames being processed concurrently across sessions.
    pub inference_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            path: "/virtual_paint".to_string(),
            min_payload_len: 64,
            default_mode: OperatingMode::Paint,
            paint_response: PaintResponse::Canvas,
            annotate: false,
            inference_workers: 2,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let trimmed = self.listen.trim();
        let bare = trimmed
            .strip_prefix("ws://")
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        bare.parse()
            .with_context(|| format!("invalid listen address {trimmed}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaintResponse {
    /// Only the segment drawn for this frame.
    Delta,
    /// The whole canvas, PNG encoded.
    Canvas,
}

/// Everything the classifier checkpoint is coupled to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub version: u32,
    pub raster_width: u32,
    pub raster_height: u32,
    pub normalize_mean: f32,
    pub normalize_std: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            version: RECOGNITION_CONFIG_VERSION,
            raster_width: 28,
            raster_height: 28,
            normalize_mean: 0.5,
            normalize_std: 0.5,
        }
    }
}

impl RecognitionConfig {
    pub fn raster_shape(&self) -> RasterShape {
        RasterShape::new(self.raster_width, self.raster_height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    pub color: StrokeColor,
    pub thickness: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            color: StrokeColor::default(),
            thickness: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub classifier: PathBuf,
    pub handpose: PathBuf,
    /// Handpose confidence below which a frame counts as "no hand".
    pub detection_threshold: f32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            classifier: default_classifier_model_path(),
            handpose: default_handpose_model_path(),
            detection_threshold: 0.2,
        }
    }
}

impl Config {
    /// Reads `path` if it exists, otherwise falls back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        } else {
            log::info!(
                "config {} not found, using defaults",
                path.display()
            );
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rec = &self.recognition;
        if rec.version != RECOGNITION_CONFIG_VERSION {
            bail!(
                "unsupported recognition config version {} (expected {})",
                rec.version,
                RECOGNITION_CONFIG_VERSION
            );
        }
        if rec.raster_width < 2 || rec.raster_height < 2 {
            bail!(
                "raster must be at least 2x2, got {}x{}",
                rec.raster_width,
                rec.raster_height
            );
        }
        if !(rec.normalize_std > 0.0) {
            bail!("normalize_std must be positive, got {}", rec.normalize_std);
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            bail!("canvas dimensions must be non-zero");
        }
        if !(1..=MAX_STROKE_THICKNESS).contains(&self.canvas.thickness) {
            bail!(
                "canvas thickness must be between 1 and {MAX_STROKE_THICKNESS}, got {}",
                self.canvas.thickness
            );
        }
        if self.server.inference_workers == 0 {
            bail!("inference_workers must be at least 1");
        }
        if !self.server.path.starts_with('/') {
            bail!("server path must start with '/', got {}", self.server.path);
        }
        self.server.listen_addr()?;
        Ok(())
    }
}
