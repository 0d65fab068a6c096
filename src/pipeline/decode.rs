use std::{borrow::Cow, time::Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// One inbound frame as it came off the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Encoded image bytes (PNG, JPEG, ...).
    Binary(Vec<u8>),
    /// Base64 image, optionally as a `data:` URL.
    Text(String),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Binary(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload of {len} bytes is below the {min} byte minimum")]
    TooShort { len: usize, min: usize },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),
    #[error("image has zero area")]
    Empty,
}

pub fn decode_payload(payload: &Payload, min_len: usize) -> Result<Frame, DecodeError> {
    if payload.len() < min_len {
        return Err(DecodeError::TooShort {
            len: payload.len(),
            min: min_len,
        });
    }

    let bytes: Cow<'_, [u8]> = match payload {
        Payload::Binary(bytes) => Cow::Borrowed(bytes),
        Payload::Text(text) => Cow::Owned(STANDARD.decode(strip_data_url(text).trim())?),
    };
    decode_image(&bytes)
}

fn strip_data_url(text: &str) -> &str {
    match text.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => text,
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let (rgba, width, height) = if bytes.starts_with(&JPEG_SOI) {
        jpeg_to_rgba(bytes)?
    } else {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        (image.into_raw(), width, height)
    };

    if width == 0 || height == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn jpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| DecodeError::Jpeg(format!("{err:?}")))?;

    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Jpeg("missing header info".to_string()))?;
    let width = u32::try_from(info.width)
        .map_err(|_| DecodeError::Jpeg("width does not fit u32".to_string()))?;
    let height = u32::try_from(info.height)
        .map_err(|_| DecodeError::Jpeg("height does not fit u32".to_string()))?;

    let expected_len = width as usize * height as usize * 4;
    if rgba.len() < expected_len {
        return Err(DecodeError::Jpeg(format!(
            "decode produced too few bytes: got {}, expected {expected_len}",
            rgba.len()
        )));
    }

    Ok((rgba, width, height))
}
