//! Real-time playback pipeline for chiptune decoders.
//!
//! A [`decoder::DecoderBackend`] produces fixed-rate 16-bit PCM blocks; the
//! [`resample::LinearResampler`] converts them to the device rate; the
//! [`buffer::PlaybackBuffers`] keep one block of lookahead ready for the output
//! callback; the [`transport::Transport`] owns the play/pause/seek state machine
//! and the fade-out schedule; [`gain::GainControl`] is the final gain stage.

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
pub mod gain;
pub mod output;
pub mod player;
pub mod resample;
pub mod status;
pub mod track;
pub mod transport;

#[cfg(test)]
mod testing;

pub use spc_player_types as types;
