//! Frame Capture Library for Gaze Proctoring
//!
//! The browser owns the webcam; frames arrive over the wire as JPEG (or PNG)
//! payloads, either raw or base64 encoded. This crate provides:
//! - Encoded frame payloads and their decoding to RGB
//! - Re-encoding to JPEG for evidence storage

pub mod frame;
pub mod payload;

pub use frame::{ImageFormat, VideoFrame};
pub use payload::EncodedFrame;

use thiserror::Error;

/// Frame error types
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Invalid base64 payload: {0}")]
    Base64(String),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}
