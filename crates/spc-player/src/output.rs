//! Output graph: device clock, gain stage and the CPAL output stream.
//!
//! The transport only sees the [`OutputGraph`] trait (clock + suspend/resume). The
//! CPAL implementation drives a [`BlockRenderer`] from the real-time callback:
//! - pulls complete resampled blocks from [`PlaybackBuffers`] (never partial ones)
//! - applies the gain curve sample by sample on the graph clock
//! - maps block channels onto device channels (mono<->stereo, best-effort otherwise)
//! - converts `f32` to the device sample format
//!
//! While suspended the callback writes silence and the clock does not advance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::buffer::{BlockSource, PlaybackBuffers};
use crate::gain::GainControl;
use crate::resample::ResampledBlock;

/// Device-side clock and run state consumed by the transport.
pub trait OutputGraph {
    /// Seconds of audio rendered while running. Frozen while suspended.
    fn current_time(&self) -> f64;
    fn suspend(&self);
    fn resume(&self);
    fn is_running(&self) -> bool;
}

/// Frame-counting clock shared between the callback and the control side.
#[derive(Debug)]
pub struct OutputClock {
    sample_rate: u32,
    running: AtomicBool,
    rendered_frames: AtomicU64,
}

impl OutputClock {
    /// New clock, initially suspended.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            running: AtomicBool::new(false),
            rendered_frames: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Acquire)
    }

    pub fn time(&self) -> f64 {
        self.rendered_frames() as f64 / self.sample_rate as f64
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn advance(&self, frames: usize) {
        self.rendered_frames
            .fetch_add(frames as u64, Ordering::AcqRel);
    }
}

/// Callback-side playback state.
///
/// Keeps the block currently being drained so device callbacks of any size can be
/// served from fixed-size resampled blocks.
pub struct BlockRenderer {
    buffers: Arc<PlaybackBuffers>,
    gain: Arc<GainControl>,
    clock: Arc<OutputClock>,
    block: ResampledBlock,
    generation: u64,
    pos: usize,
}

impl BlockRenderer {
    pub fn new(
        buffers: Arc<PlaybackBuffers>,
        gain: Arc<GainControl>,
        clock: Arc<OutputClock>,
    ) -> Self {
        let block = buffers.new_block();
        let pos = block.frames();
        Self {
            generation: buffers.generation(),
            buffers,
            gain,
            clock,
            block,
            pos,
        }
    }

    /// Fill one device buffer of interleaved `channels_out` samples.
    pub fn render<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        let channels_out = channels_out.max(1);
        if !self.clock.is_running() {
            data.fill(silence);
            return;
        }

        // Drop the rest of a block decoded from a handle that has since been replaced.
        if self.buffers.generation() != self.generation {
            self.pos = self.block.frames();
        }

        let frames = data.len() / channels_out;
        let curve = self.gain.snapshot();
        let start = self.clock.rendered_frames();
        let rate = self.clock.sample_rate() as f64;

        for frame in 0..frames {
            if self.pos >= self.block.frames() {
                let delivery = self.buffers.fill_next(&mut self.block);
                if delivery.source == BlockSource::Silent {
                    data[frame * channels_out..].fill(silence);
                    break;
                }
                self.generation = delivery.generation;
                self.pos = 0;
            }

            let gain = curve.value_at((start + frame as u64) as f64 / rate);
            for ch in 0..channels_out {
                let sample = mapped_sample(&self.block, self.pos, ch, channels_out) * gain;
                data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
            }
            self.pos += 1;
        }

        let tail = frames * channels_out;
        data[tail..].fill(silence);
        self.clock.advance(frames);
    }
}

/// Read block sample for device channel `dst_ch`.
///
/// - mono -> stereo: duplicate channel 0
/// - stereo -> mono: average L/R
/// - matching layouts: pass-through
/// - other layouts: clamp to the last available channel
fn mapped_sample(block: &ResampledBlock, frame: usize, dst_ch: usize, dst_channels: usize) -> f32 {
    let src_channels = block.channels();
    match (src_channels, dst_channels) {
        (2, 1) => 0.5 * (block.channel(0)[frame] + block.channel(1)[frame]),
        (1, _) => block.channel(0)[frame],
        _ => block.channel(dst_ch.min(src_channels - 1))[frame],
    }
}

/// CPAL-backed output graph.
///
/// The stream runs for the lifetime of this value; suspension is a flag the callback
/// honours by writing silence ("pause means pause": nothing is drained or skipped).
pub struct CpalOutput {
    _stream: cpal::Stream,
    clock: Arc<OutputClock>,
}

impl CpalOutput {
    /// Build and start an output stream rendering from `buffers` through `gain`.
    ///
    /// The graph starts suspended.
    pub fn open(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        sample_format: cpal::SampleFormat,
        buffers: Arc<PlaybackBuffers>,
        gain: Arc<GainControl>,
    ) -> Result<Self> {
        let clock = Arc::new(OutputClock::new(config.sample_rate));
        let renderer = BlockRenderer::new(buffers, gain, clock.clone());
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(device, config, renderer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(device, config, renderer)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(device, config, renderer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(device, config, renderer)?,
            other => return Err(anyhow!("Unsupported sample format: {other:?}")),
        };
        stream.play()?;
        tracing::info!(
            rate_hz = config.sample_rate,
            channels = config.channels,
            buffer_size = ?config.buffer_size,
            "output stream started"
        );
        Ok(Self {
            _stream: stream,
            clock,
        })
    }
}

impl OutputGraph for CpalOutput {
    fn current_time(&self) -> f64 {
        self.clock.time()
    }

    fn suspend(&self) {
        self.clock.set_running(false);
    }

    fn resume(&self) {
        self.clock.set_running(true);
    }

    fn is_running(&self) -> bool {
        self.clock.is_running()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: BlockRenderer,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| renderer.render(data, channels_out),
        err_fn,
        None,
    )?;
    Ok(stream)
}
