use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::{
    config::{Config, PaintResponse},
    gesture::{Classification, ClassifyError, GestureClassifier},
    pipeline::{
        annotate::annotate_frame,
        compositor::{SketchState, StrokeUpdate},
        decode::{DecodeError, Payload, decode_payload},
        detector::LandmarkDetector,
        skeleton::{RasterizeError, Rasterizer},
    },
    types::{LandmarkSet, OperatingMode},
};

use super::protocol::ServerMessage;

pub type SharedDetector = Arc<Mutex<dyn LandmarkDetector>>;
pub type SharedClassifier = Arc<Mutex<GestureClassifier>>;

/// Per-frame failures. None of these end the session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] DecodeError),
    #[error("cannot rasterize hand: {0}")]
    DegenerateGeometry(#[from] RasterizeError),
    #[error("landmark detection failed: {0:#}")]
    Detection(anyhow::Error),
    #[error("classification failed: {0}")]
    Classification(#[from] ClassifyError),
    #[error("image encoding failed: {0:#}")]
    Encode(anyhow::Error),
    #[error("frame worker failed: {0}")]
    WorkerFailed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Gesture(Classification),
    Painted {
        update: StrokeUpdate,
        /// Full canvas, when the server answers with canvases.
        png: Option<Vec<u8>>,
    },
    NoHand,
}

impl FrameOutcome {
    pub fn into_message(self) -> ServerMessage {
        match self {
            FrameOutcome::Gesture(c) => ServerMessage::Gesture {
                label: c.label,
                probabilities: c.probabilities,
            },
            FrameOutcome::Painted { png: Some(png), .. } => ServerMessage::canvas(&png),
            FrameOutcome::Painted { update, png: None } => match update {
                StrokeUpdate::PenDown(at) => ServerMessage::PenDown { at },
                StrokeUpdate::Drawn(segment) => ServerMessage::Stroke { segment },
                StrokeUpdate::Held => ServerMessage::NoHand,
            },
            FrameOutcome::NoHand => ServerMessage::NoHand,
        }
    }
}

/// Per-session knobs that shape how a frame is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOptions {
    pub mode: OperatingMode,
    /// Also return the input frame with the detected hand drawn on it.
    pub annotate: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Processed {
    pub outcome: FrameOutcome,
    /// PNG of the annotated input frame, when requested.
    pub annotated: Option<Vec<u8>>,
}

impl Processed {
    /// The outcome reply, followed by the annotated frame if there is one.
    pub fn into_messages(self) -> Vec<ServerMessage> {
        let mut messages = vec![self.outcome.into_message()];
        if let Some(png) = self.annotated {
            messages.push(ServerMessage::annotated(&png));
        }
        messages
    }
}

/// Decode → detect → {rasterize → classify | composite} for one frame.
pub struct FrameProcessor {
    detector: SharedDetector,
    classifier: SharedClassifier,
    rasterizer: Rasterizer,
    min_payload_len: usize,
    paint_response: PaintResponse,
}

impl FrameProcessor {
    pub fn new(config: &Config, detector: SharedDetector, classifier: SharedClassifier) -> Self {
        Self {
            detector,
            classifier,
            rasterizer: Rasterizer::new(config.recognition.raster_shape()),
            min_payload_len: config.server.min_payload_len,
            paint_response: config.server.paint_response,
        }
    }

    /// Runs synchronously; callers keep it off the async reactor. The sketch
    /// is only touched once the frame has a hand in it.
    pub fn process(
        &self,
        payload: &Payload,
        options: FrameOptions,
        sketch: &Mutex<SketchState>,
    ) -> Result<Processed, FrameError> {
        let frame = decode_payload(payload, self.min_payload_len)?;
        let landmarks = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(&frame)
            .map_err(FrameError::Detection)?;
        log::trace!(
            "{}x{} frame, detection took {:?}",
            frame.width,
            frame.height,
            frame.timestamp.elapsed()
        );

        let outcome = match options.mode {
            OperatingMode::Gesture => match &landmarks {
                Some(landmarks) => FrameOutcome::Gesture(self.classify(landmarks)?),
                None => FrameOutcome::NoHand,
            },
            OperatingMode::Paint => {
                let mut sketch = sketch.lock().unwrap_or_else(PoisonError::into_inner);
                self.paint(&mut sketch, landmarks.as_ref())?
            }
        };

        let annotated = if options.annotate {
            Some(annotate_frame(&frame, landmarks.as_ref()).map_err(FrameError::Encode)?)
        } else {
            None
        };
        Ok(Processed { outcome, annotated })
    }

    pub fn classify(&self, landmarks: &LandmarkSet) -> Result<Classification, FrameError> {
        let raster = self.rasterizer.rasterize(landmarks)?;
        let classification = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .classify(&raster)?;
        log::debug!(
            "classified {}{} ({:.0}%)",
            classification.label.emoji(),
            classification.label,
            classification.probabilities[classification.label as usize] * 100.0
        );
        Ok(classification)
    }

    fn paint(
        &self,
        sketch: &mut SketchState,
        landmarks: Option<&LandmarkSet>,
    ) -> Result<FrameOutcome, FrameError> {
        let update = sketch.apply_detection(landmarks);
        if update == StrokeUpdate::Held {
            return Ok(FrameOutcome::NoHand);
        }

        let png = match self.paint_response {
            PaintResponse::Canvas => Some(sketch.encode_png().map_err(FrameError::Encode)?),
            PaintResponse::Delta => None,
        };
        Ok(FrameOutcome::Painted { update, png })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::CanvasConfig,
        gesture::tests::FixedModel,
        pipeline::compositor::Segment,
        pipeline::skeleton::tests::open_palm,
        types::{Frame, GestureLabel, NUM_LANDMARKS, POINTING_FINGERTIP, PixelPos, Point2D},
    };
    use image::{ImageFormat, Rgb, RgbImage};
    use std::{collections::VecDeque, io::Cursor};

    /// Hands out pre-scripted detections, then reports no hand.
    pub(crate) struct ScriptedDetector {
        pub script: VecDeque<Option<LandmarkSet>>,
        pub calls: usize,
    }

    impl ScriptedDetector {
        pub(crate) fn shared(script: Vec<Option<LandmarkSet>>) -> SharedDetector {
            Arc::new(Mutex::new(Self {
                script: script.into(),
                calls: 0,
            }))
        }
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Option<LandmarkSet>> {
            self.calls += 1;
            Ok(self.script.pop_front().flatten())
        }
    }

    pub(crate) fn test_config() -> Config {
        let mut config = Config::default();
        config.server.min_payload_len = 16;
        config.server.paint_response = PaintResponse::Delta;
        // Fractions of 640x400 that land on whole pixels.
        config.canvas = CanvasConfig {
            width: 640,
            height: 400,
            ..CanvasConfig::default()
        };
        config
    }

    pub(crate) fn png_payload() -> Payload {
        let img = RgbImage::from_pixel(8, 8, Rgb([40, 40, 40]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        Payload::Binary(bytes)
    }

    pub(crate) fn pointing_at(px: PixelPos, canvas: &CanvasConfig) -> LandmarkSet {
        let mut pts = [Point2D::new(0.5, 0.5); NUM_LANDMARKS];
        pts[POINTING_FINGERTIP] = Point2D::new(
            px.x as f32 / canvas.width as f32,
            px.y as f32 / canvas.height as f32,
        );
        LandmarkSet::new(pts)
    }

    fn plain(mode: OperatingMode) -> FrameOptions {
        FrameOptions {
            mode,
            annotate: false,
        }
    }

    fn processor(config: &Config, script: Vec<Option<LandmarkSet>>, logits: Vec<f32>) -> FrameProcessor {
        let classifier = GestureClassifier::new(
            Box::new(FixedModel::new(logits)),
            config.recognition.clone(),
        );
        FrameProcessor::new(
            config,
            ScriptedDetector::shared(script),
            Arc::new(Mutex::new(classifier)),
        )
    }

    #[test]
    fn gesture_mode_classifies_detected_hand() {
        let config = test_config();
        let processor = processor(&config, vec![Some(open_palm())], vec![0.0, 0.0, 3.0, 0.0]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));

        let outcome = processor
            .process(&png_payload(), plain(OperatingMode::Gesture), &sketch)
            .unwrap()
            .outcome;
        let FrameOutcome::Gesture(classification) = outcome else {
            panic!("expected a gesture, got {outcome:?}");
        };
        assert_eq!(classification.label, GestureLabel::Palm);
    }

    #[test]
    fn short_payload_fails_without_touching_sketch() {
        let config = test_config();
        let processor = processor(&config, vec![Some(open_palm())], vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));
        sketch.lock().unwrap().draw_to(PixelPos::new(7, 7));

        let err = processor
            .process(&Payload::Binary(vec![0; 4]), plain(OperatingMode::Paint), &sketch)
            .unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(DecodeError::TooShort { .. })));
        assert_eq!(
            ServerMessage::failed(err.to_string()),
            ServerMessage::Error {
                message: "processing failed",
                reason: err.to_string(),
            }
        );

        let sketch = sketch.lock().unwrap();
        assert_eq!(sketch.previous_position(), Some(PixelPos::new(7, 7)));
        assert!(sketch.canvas().pixels().all(|px| px.0 == [0, 0, 0]));
    }

    #[test]
    fn paint_frames_draw_a_horizontal_line() {
        let config = test_config();
        let script = vec![
            Some(pointing_at(PixelPos::new(100, 100), &config.canvas)),
            Some(pointing_at(PixelPos::new(120, 100), &config.canvas)),
        ];
        let processor = processor(&config, script, vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));

        let first = processor
            .process(&png_payload(), plain(OperatingMode::Paint), &sketch)
            .unwrap()
            .outcome;
        assert_eq!(
            first.into_message(),
            ServerMessage::PenDown {
                at: PixelPos::new(100, 100)
            }
        );

        let second = processor
            .process(&png_payload(), plain(OperatingMode::Paint), &sketch)
            .unwrap()
            .outcome;
        let FrameOutcome::Painted {
            update: StrokeUpdate::Drawn(Segment { from, to, .. }),
            png: None,
        } = second
        else {
            panic!("expected a drawn segment, got {second:?}");
        };
        assert_eq!((from, to), (PixelPos::new(100, 100), PixelPos::new(120, 100)));

        let sketch = sketch.lock().unwrap();
        assert_eq!(sketch.previous_position(), Some(PixelPos::new(120, 100)));
        let ink = Rgb(config.canvas.color.0);
        for x in 100..=120 {
            assert_eq!(sketch.canvas().get_pixel(x, 100), &ink);
        }
        assert_eq!(sketch.canvas().get_pixel(100, 110), &Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_hand_is_reported_not_raised() {
        let config = test_config();
        let single_point = LandmarkSet::new([Point2D::new(0.3, 0.3); NUM_LANDMARKS]);
        let processor = processor(&config, vec![Some(single_point)], vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));

        let err = processor
            .process(&png_payload(), plain(OperatingMode::Gesture), &sketch)
            .unwrap_err();
        assert!(matches!(err, FrameError::DegenerateGeometry(_)));
    }

    #[test]
    fn missing_hand_is_a_no_result_in_both_modes() {
        let config = test_config();
        let processor = processor(&config, vec![None, None], vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));
        sketch.lock().unwrap().draw_to(PixelPos::new(1, 1));

        for mode in [OperatingMode::Gesture, OperatingMode::Paint] {
            let outcome = processor
                .process(&png_payload(), plain(mode), &sketch)
                .unwrap()
                .outcome;
            assert_eq!(outcome, FrameOutcome::NoHand);
        }
        assert_eq!(
            sketch.lock().unwrap().previous_position(),
            Some(PixelPos::new(1, 1))
        );
    }

    #[test]
    fn canvas_responses_carry_png() {
        let mut config = test_config();
        config.server.paint_response = PaintResponse::Canvas;
        let script = vec![Some(pointing_at(PixelPos::new(10, 10), &config.canvas))];
        let processor = processor(&config, script, vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));

        let outcome = processor
            .process(&png_payload(), plain(OperatingMode::Paint), &sketch)
            .unwrap()
            .outcome;
        assert!(matches!(
            outcome.into_message(),
            ServerMessage::Canvas { png } if !png.is_empty()
        ));
    }

    #[test]
    fn annotation_follows_the_outcome() {
        let config = test_config();
        let processor = processor(&config, vec![Some(open_palm()), None], vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));
        let options = FrameOptions {
            mode: OperatingMode::Gesture,
            annotate: true,
        };

        let processed = processor.process(&png_payload(), options, &sketch).unwrap();
        let png = processed.annotated.clone().expect("annotated frame");
        let image = image::load_from_memory(&png).unwrap();
        assert_eq!((image.width(), image.height()), (8, 8));

        let messages = processed.into_messages();
        assert!(matches!(messages[0], ServerMessage::Gesture { .. }));
        assert!(matches!(&messages[1], ServerMessage::Annotated { png } if !png.is_empty()));

        // No hand still returns the bare frame alongside `no_hand`.
        let processed = processor.process(&png_payload(), options, &sketch).unwrap();
        assert_eq!(processed.outcome, FrameOutcome::NoHand);
        assert!(processed.annotated.is_some());
        assert_eq!(processed.into_messages().len(), 2);
    }

    #[test]
    fn annotation_is_opt_in() {
        let config = test_config();
        let processor = processor(&config, vec![Some(open_palm())], vec![0.0; 4]);
        let sketch = Mutex::new(SketchState::new(&config.canvas));

        let processed = processor
            .process(&png_payload(), plain(OperatingMode::Gesture), &sketch)
            .unwrap();
        assert_eq!(processed.annotated, None);
        assert_eq!(processed.into_messages().len(), 1);
    }
}
