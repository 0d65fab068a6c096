//! Wire shapes for the paint socket.
//!
//! Inbound binary messages are always frames. Inbound text is a control
//! message when it parses as a JSON object, otherwise a base64 frame.
//! Everything outbound is a `type`-tagged JSON text message.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    pipeline::{compositor::Segment, decode::Payload},
    types::{GestureLabel, OperatingMode, PixelPos, StrokeColor},
};

/// Literal text clients receive for any per-frame failure.
pub const PROCESSING_FAILED: &str = "processing failed";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SetMode { mode: OperatingMode },
    SetColor { color: StrokeColor },
    SetThickness { thickness: u32 },
    /// Turns the per-frame `annotated` reply on or off.
    SetAnnotate { enabled: bool },
    ResetStroke,
    Clear,
    Snapshot,
}

impl ControlMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::SetMode { .. } => "set_mode",
            ControlMessage::SetColor { .. } => "set_color",
            ControlMessage::SetThickness { .. } => "set_thickness",
            ControlMessage::SetAnnotate { .. } => "set_annotate",
            ControlMessage::ResetStroke => "reset_stroke",
            ControlMessage::Clear => "clear",
            ControlMessage::Snapshot => "snapshot",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        mode: OperatingMode,
        canvas: [u32; 2],
    },
    Gesture {
        label: GestureLabel,
        probabilities: [f32; 4],
    },
    PenDown {
        at: PixelPos,
    },
    Stroke {
        #[serde(flatten)]
        segment: Segment,
    },
    Canvas {
        png: String,
    },
    /// The decoded frame with the detected hand drawn over it.
    Annotated {
        png: String,
    },
    NoHand,
    Ack {
        action: &'static str,
    },
    Error {
        message: &'static str,
        reason: String,
    },
    Shutdown,
}

impl ServerMessage {
    pub fn failed(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: PROCESSING_FAILED,
            reason: reason.into(),
        }
    }

    pub fn canvas(png: &[u8]) -> Self {
        ServerMessage::Canvas {
            png: STANDARD.encode(png),
        }
    }

    pub fn annotated(png: &[u8]) -> Self {
        ServerMessage::Annotated {
            png: STANDARD.encode(png),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            log::error!("failed to serialize outbound message: {err}");
            format!(r#"{{"type":"error","message":"{PROCESSING_FAILED}","reason":"serialization"}}"#)
        })
    }

    pub fn to_ws(&self) -> Message {
        Message::Text(self.to_json().into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Frame(Payload),
    Control(ControlMessage),
    /// Looked like a control message but did not parse.
    Invalid(String),
}

pub fn parse_text(text: &str) -> Inbound {
    if text.trim_start().starts_with('{') {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(control) => Inbound::Control(control),
            Err(err) => Inbound::Invalid(format!("invalid control message: {err}")),
        }
    } else {
        Inbound::Frame(Payload::Text(text.to_string()))
    }
}
