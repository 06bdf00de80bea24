//! Headerless PCM track images.
//!
//! The image is little-endian interleaved `i16` at the source rate. Playback
//! wraps at the end of the image, so looping happens on the decoder side like
//! a native chiptune engine.

use std::sync::Arc;
use std::time::Duration;

use super::{BackendStatus, DecoderBackend, DecoderHandle, Readiness, SOURCE_RATE};
use crate::error::DecodeError;

/// Backend that plays raw PCM images. Always ready.
pub struct PcmImageBackend {
    channels: usize,
    source_rate: u32,
    readiness: Readiness,
}

impl PcmImageBackend {
    pub fn new(channels: usize) -> Self {
        Self::with_rate(channels, SOURCE_RATE)
    }

    pub fn with_rate(channels: usize, source_rate: u32) -> Self {
        Self {
            channels: channels.max(1),
            source_rate,
            readiness: Readiness::new(BackendStatus::Ready),
        }
    }

    fn frame_bytes(&self) -> usize {
        self.channels * 2
    }
}

impl DecoderBackend for PcmImageBackend {
    fn source_rate(&self) -> u32 {
        self.source_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    fn validate(&self, image: &[u8]) -> Result<(), DecodeError> {
        if image.is_empty() {
            return Err(DecodeError::Empty);
        }
        if image.len() % self.frame_bytes() != 0 {
            return Err(DecodeError::Malformed(format!(
                "{} bytes is not a whole number of {}-channel frames",
                image.len(),
                self.channels
            )));
        }
        Ok(())
    }

    fn load(&self, image: &[u8]) -> Result<Box<dyn DecoderHandle>, DecodeError> {
        self.validate(image)?;
        let samples: Arc<[i16]> = image
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let frames = samples.len() / self.channels;
        tracing::debug!(frames, channels = self.channels, "pcm image loaded");
        Ok(Box::new(PcmImageHandle {
            samples,
            channels: self.channels,
            source_rate: self.source_rate,
            frames,
            cursor: 0,
        }))
    }
}

struct PcmImageHandle {
    samples: Arc<[i16]>,
    channels: usize,
    source_rate: u32,
    frames: usize,
    cursor: usize,
}

impl DecoderHandle for PcmImageHandle {
    fn decode_block(&mut self, out: &mut [i16]) -> Result<(), DecodeError> {
        if out.len() % self.channels != 0 {
            return Err(DecodeError::Decoder(format!(
                "block of {} samples is not a whole number of frames",
                out.len()
            )));
        }
        for frame in out.chunks_exact_mut(self.channels) {
            let start = self.cursor * self.channels;
            frame.copy_from_slice(&self.samples[start..start + self.channels]);
            self.cursor = (self.cursor + 1) % self.frames;
        }
        Ok(())
    }

    fn skip(&mut self, elapsed: Duration) {
        let frames = (elapsed.as_secs_f64() * self.source_rate as f64) as u64;
        self.cursor = ((self.cursor as u64 + frames) % self.frames as u64) as usize;
    }
}
