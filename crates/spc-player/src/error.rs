//! Error taxonomy for the playback pipeline.

use thiserror::Error;

/// Errors raised while opening or running a track image.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The track payload is missing or zero-length.
    #[error("track image is empty")]
    Empty,
    /// The payload failed the backend's validation.
    #[error("malformed track image: {0}")]
    Malformed(String),
    /// The decoder failed while producing samples.
    #[error("decoder failure: {0}")]
    Decoder(String),
}

/// Resampler indexing contract violation.
///
/// Raised when the raw block is shorter than the interpolation window of the
/// requested output length. Never expected with blocks sized by
/// [`crate::resample::LinearResampler::raw_frames`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("raw block overflow at output sample {index}: needs frame {needed}, have {available}")]
pub struct RangeError {
    pub index: usize,
    pub needed: usize,
    pub available: usize,
}

/// Top-level player errors surfaced to callers of the transport.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlayerError {
    /// The platform lacks required audio/runtime primitives or the backend
    /// failed to initialize. Fatal for the session.
    #[error("playback backend unavailable")]
    BackendUnsupported,
    /// The backend has not finished initializing; the request is retried.
    #[error("playback backend not ready")]
    BackendNotReady,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The lookahead block was not ready when the device asked for it.
    #[error("buffer underrun")]
    BufferUnderrun,
    #[error(transparent)]
    Range(#[from] RangeError),
    /// An operation that needs a loaded track was invoked without one.
    #[error("no track loaded")]
    NoTrack,
}

impl PlayerError {
    /// User-facing message delivered through the error notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::BackendUnsupported => "Couldn't load SPC player.".to_string(),
            Self::Decode(DecodeError::Empty) => "Couldn't read SPC file.".to_string(),
            other => other.to_string(),
        }
    }
}
