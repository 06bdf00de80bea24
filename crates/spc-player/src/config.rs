use std::time::Duration;

/// Playback tuning parameters and user preferences consumed at startup.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Resampled block length in frames (one output callback cycle).
    pub block_frames: usize,
    /// Period of the transport polling tick (elapsed/fade boundary checks).
    pub tick_interval: Duration,
    /// Preferred volume restored on every load, in `[0, 1.5]`.
    pub initial_volume: f32,
    /// When `true`, loop boundaries are ignored and the decoder keeps going.
    pub looping: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            block_frames: 16_384,
            tick_interval: Duration::from_millis(500),
            initial_volume: 1.0,
            looping: true,
        }
    }
}

/// Output-side parameters fixed once the device stream is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    /// Device sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per resampled block.
    pub block_frames: usize,
}
