//! Linear-interpolation resample stage.
//!
//! Converts one block of interleaved `i16` decoder output at the source rate into
//! per-channel `f32` buffers at the output device rate. Output sample `i` reads
//! source frames `b = floor(i * src / dst)` and `b + 1`, weighted by the fractional
//! part of the source position. Positions are computed with integer arithmetic so
//! the window of the last sample is known exactly when sizing the raw block.

use crate::error::RangeError;

/// Divisor mapping `i16` decoder output into the `[-1, 1]` range.
///
/// Slightly below `i16::MAX + 1` to leave headroom.
pub const FULL_SCALE: f32 = 32_000.0;

/// Per-channel resampled audio for one callback cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResampledBlock {
    channels: Vec<Vec<f32>>,
}

impl ResampledBlock {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels.max(1)],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.channels[ch]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.channels[ch]
    }

    pub fn fill_silence(&mut self) {
        for ch in &mut self.channels {
            ch.fill(0.0);
        }
    }
}

/// Fixed-ratio linear resampler for a constant block length.
#[derive(Clone, Debug)]
pub struct LinearResampler {
    source_rate: u32,
    output_rate: u32,
    channels: usize,
    out_frames: usize,
    raw_frames: usize,
}

impl LinearResampler {
    /// Build a resampler producing `out_frames` frames per block.
    ///
    /// The raw block is `1 + floor(out_frames * src / dst)` frames. When the output
    /// rate is above the source rate the last sample's interpolation window can end
    /// one frame past that, in which case the block is widened to cover it.
    pub fn new(source_rate: u32, output_rate: u32, channels: usize, out_frames: usize) -> Self {
        let source_rate = source_rate.max(1);
        let output_rate = output_rate.max(1);
        let formula = 1 + (out_frames as u64 * source_rate as u64 / output_rate as u64) as usize;
        let window = match out_frames.checked_sub(1) {
            Some(last) => {
                let (base, rem) = source_position(last, source_rate, output_rate);
                if rem == 0 { base + 1 } else { base + 2 }
            }
            None => 0,
        };
        let raw_frames = formula.max(window);
        if raw_frames > formula {
            tracing::debug!(
                formula_frames = formula,
                raw_frames,
                "raw block widened to cover interpolation window"
            );
        }

        Self {
            source_rate,
            output_rate,
            channels: channels.max(1),
            out_frames,
            raw_frames,
        }
    }

    /// Source frames consumed per output frame.
    pub fn ratio(&self) -> f64 {
        self.source_rate as f64 / self.output_rate as f64
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Output frames per block.
    pub fn out_frames(&self) -> usize {
        self.out_frames
    }

    /// Raw frames the decoder must produce per block.
    pub fn raw_frames(&self) -> usize {
        self.raw_frames
    }

    /// Interleaved raw samples per block (`raw_frames * channels`).
    pub fn raw_samples(&self) -> usize {
        self.raw_frames * self.channels
    }

    /// Allocate an output block of the right shape.
    pub fn new_block(&self) -> ResampledBlock {
        ResampledBlock::new(self.channels, self.out_frames)
    }

    /// Resample interleaved `raw` into `out`.
    ///
    /// The whole block is bounds-checked before anything is written, so on error
    /// `out` keeps its previous contents.
    pub fn resample(&self, raw: &[i16], out: &mut ResampledBlock) -> Result<(), RangeError> {
        let frames = out.frames();
        let available = raw.len() / self.channels;

        if let Some(last) = frames.checked_sub(1) {
            let (base, rem) = source_position(last, self.source_rate, self.output_rate);
            let needed = if rem == 0 { base } else { base + 1 };
            if needed >= available {
                return Err(RangeError {
                    index: last,
                    needed,
                    available,
                });
            }
        }

        let channels = self.channels.min(out.channels());
        let denom = self.output_rate as f32;
        for i in 0..frames {
            let (base, rem) = source_position(i, self.source_rate, self.output_rate);
            let high = rem as f32 / denom;
            let low = 1.0 - high;
            for ch in 0..channels {
                let a = raw[base * self.channels + ch] as f32;
                let value = if rem == 0 {
                    a
                } else {
                    let b = raw[(base + 1) * self.channels + ch] as f32;
                    a * low + b * high
                };
                out.channel_mut(ch)[i] = value / FULL_SCALE;
            }
        }
        Ok(())
    }
}

/// Integer source position of output frame `index`: `(floor, remainder)` of
/// `index * src / dst`.
fn source_position(index: usize, source_rate: u32, output_rate: u32) -> (usize, u64) {
    let num = index as u64 * source_rate as u64;
    let dst = output_rate as u64;
    ((num / dst) as usize, num % dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: [u32; 9] = [
        8_000, 11_025, 22_050, 32_000, 44_100, 48_000, 88_200, 96_000, 192_000,
    ];

    #[test]
    fn raw_frames_follow_block_formula() {
        let r = LinearResampler::new(32_000, 48_000, 2, 16_384);
        assert_eq!(r.raw_frames(), 10_923);
        assert_eq!(r.raw_samples(), 21_846);

        let r = LinearResampler::new(32_000, 44_100, 2, 16_384);
        assert_eq!(r.raw_frames(), 1 + 16_384 * 32_000 / 44_100);

        let r = LinearResampler::new(32_000, 16_000, 2, 1024);
        assert_eq!(r.raw_frames(), 2049);
    }

    #[test]
    fn sized_blocks_never_overflow() {
        for &dst in &RATES {
            for &frames in &[1usize, 2, 3, 17, 511, 4096, 16_384] {
                let r = LinearResampler::new(32_000, dst, 2, frames);
                let raw = vec![0i16; r.raw_samples()];
                let mut out = r.new_block();
                assert!(
                    r.resample(&raw, &mut out).is_ok(),
                    "overflow for dst={dst} frames={frames}"
                );
            }
        }
    }

    #[test]
    fn misaligned_upsampling_is_widened() {
        // 1 + floor(3 * 3 / 10) = 1 frame, but sample 2 reads frames 0 and 1.
        let r = LinearResampler::new(3, 10, 1, 3);
        assert_eq!(r.raw_frames(), 2);
        let mut out = r.new_block();
        assert!(r.resample(&[0, 3200], &mut out).is_ok());
    }

    #[test]
    fn constant_input_is_preserved_at_any_ratio() {
        for &dst in &RATES {
            let r = LinearResampler::new(32_000, dst, 2, 1000);
            let raw = vec![16_000i16; r.raw_samples()];
            let mut out = r.new_block();
            r.resample(&raw, &mut out).unwrap();
            for ch in 0..2 {
                assert!(out.channel(ch).iter().all(|v| (v - 0.5).abs() < 1e-6));
            }
        }
    }

    #[test]
    fn unity_ratio_is_scaled_passthrough() {
        let r = LinearResampler::new(32_000, 32_000, 1, 4);
        let mut out = r.new_block();
        r.resample(&[0, 3200, -3200, 32_000, 0], &mut out).unwrap();
        assert_eq!(out.channel(0), &[0.0, 0.1, -0.1, 1.0]);
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        let r = LinearResampler::new(1, 2, 1, 4);
        let mut out = r.new_block();
        r.resample(&[0, 3200, 6400], &mut out).unwrap();
        let expected = [0.0, 0.05, 0.1, 0.15];
        for (got, want) in out.channel(0).iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn channels_are_resampled_independently() {
        let r = LinearResampler::new(32_000, 16_000, 2, 2);
        let raw = [100, -100, 200, -200, 300, -300, 400, -400, 500, -500];
        let mut out = r.new_block();
        r.resample(&raw, &mut out).unwrap();
        assert_eq!(out.channel(0), &[100.0 / FULL_SCALE, 300.0 / FULL_SCALE]);
        assert_eq!(out.channel(1), &[-100.0 / FULL_SCALE, -300.0 / FULL_SCALE]);
    }

    #[test]
    fn short_raw_block_is_a_range_error_and_leaves_output() {
        let r = LinearResampler::new(32_000, 48_000, 1, 8);
        let mut out = r.new_block();
        out.channel_mut(0).fill(0.25);
        let err = r.resample(&[0; 3], &mut out).unwrap_err();
        assert_eq!(err.index, 7);
        assert_eq!(err.available, 3);
        assert!(out.channel(0).iter().all(|v| *v == 0.25));
    }
}
