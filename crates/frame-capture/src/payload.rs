//! Encoded frame payloads received from the browser

use std::borrow::Cow;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::frame::{ImageFormat, VideoFrame};
use crate::FrameError;

/// Still-encoded frame as received on the wire
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// Detected image format
    pub format: ImageFormat,
    /// Frame sequence number within the stream
    pub sequence: u64,
}

impl EncodedFrame {
    /// Wrap raw image bytes (e.g. a binary WebSocket message)
    pub fn from_bytes(bytes: Vec<u8>, sequence: u64) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let format = ImageFormat::sniff(&bytes).ok_or(FrameError::UnsupportedFormat)?;
        Ok(Self {
            bytes,
            format,
            sequence,
        })
    }

    /// Parse a base64 payload, with or without a `data:image/...;base64,` prefix
    pub fn from_base64(payload: &str, sequence: u64) -> Result<Self, FrameError> {
        let body = match payload.find("base64,") {
            Some(idx) if payload.starts_with("data:") => &payload[idx + "base64,".len()..],
            _ => payload,
        };
        let body = body.trim();
        if body.is_empty() {
            return Err(FrameError::Empty);
        }

        let bytes = STANDARD
            .decode(body)
            .map_err(|e| FrameError::Base64(e.to_string()))?;
        Self::from_bytes(bytes, sequence)
    }

    /// Decode to an RGB frame
    pub fn decode(&self) -> Result<VideoFrame, FrameError> {
        let img = image::load_from_memory_with_format(&self.bytes, self.format.into())
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();

        Ok(VideoFrame::new(rgb.into_raw(), width, height, self.sequence))
    }

    /// JPEG bytes for this frame, re-encoding only when the payload is not JPEG
    pub fn to_jpeg(&self) -> Result<Cow<'_, [u8]>, FrameError> {
        if self.format == ImageFormat::Jpeg {
            return Ok(Cow::Borrowed(&self.bytes));
        }

        debug!("Re-encoding frame {} from {:?} to JPEG", self.sequence, self.format);
        let img = image::load_from_memory_with_format(&self.bytes, self.format.into())
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        // The JPEG encoder rejects alpha channels
        let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

        let mut out = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(Cow::Owned(out))
    }
}
