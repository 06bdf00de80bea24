//! Output device discovery and stream configuration.
//!
//! The decoder always produces 32 kHz stereo, so device selection only needs a rate
//! and a sample format the output stage can convert to.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Upper bound for a fixed device buffer, in frames.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Output device summary for `list-devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub min_rate: u32,
    pub max_rate: u32,
}

/// Negotiated output stream parameters.
#[derive(Clone, Debug)]
pub struct OutputSelection {
    pub name: String,
    pub config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose a stream config for `device`.
///
/// With `target_rate` the closest supported rate is used (exact when in range).
/// Without it the device default config wins, since that is the rate the system
/// mixer already runs at.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    if target_rate.is_none() {
        if let Ok(cfg) = device.default_output_config() {
            if sample_format_rank(cfg.sample_format()).is_some() {
                return Ok(cfg);
            }
        }
    }

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let Some(rank) = sample_format_rank(range.sample_format()) else {
            continue;
        };
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            distance: target_rate.map_or(0, |t| rate.abs_diff(t)),
            stereo: range.channels() == 2,
            rank,
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed buffer size when the device advertises a range, capped at
/// `MAX_BUFFER_FRAMES`. `None` leaves the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(cap_buffer(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Resolve device, config and buffer size in one step.
pub fn select_output(
    host: &cpal::Host,
    needle: Option<&str>,
    target_rate: Option<u32>,
) -> Result<(cpal::Device, OutputSelection)> {
    let device = pick_device(host, needle)?;
    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    let supported = pick_output_config(&device, target_rate)
        .with_context(|| format!("no usable output config on {name}"))?;
    let sample_format = supported.sample_format();
    let mut config = supported.config();
    if let Some(size) = pick_buffer_size(&supported) {
        config.buffer_size = size;
    }
    tracing::info!(
        device = %name,
        rate_hz = config.sample_rate,
        channels = config.channels,
        format = ?sample_format,
        "output selected"
    );
    Ok((
        device,
        OutputSelection {
            name,
            config,
            sample_format,
        },
    ))
}

/// Enumerate output devices with their supported rate span.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let mut out = Vec::new();
    for device in host.output_devices().context("No output devices")? {
        let name = device.description()?.name().to_string();
        let (min_rate, max_rate) = match device.supported_output_configs() {
            Ok(ranges) => ranges.fold((u32::MAX, 0), |(lo, hi), r| {
                (lo.min(r.min_sample_rate()), hi.max(r.max_sample_rate()))
            }),
            Err(e) => {
                tracing::warn!(device = %name, "cannot query output configs: {e}");
                continue;
            }
        };
        if max_rate == 0 {
            continue;
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    distance: u32,
    stereo: bool,
    rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.distance != other.distance {
            self.distance < other.distance
        } else if self.stereo != other.stereo {
            self.stereo
        } else {
            self.rank < other.rank
        }
    }
}

fn clamp_rate(min: u32, max: u32, target: Option<u32>) -> u32 {
    match target {
        Some(t) => t.clamp(min, max.max(min)),
        None => max,
    }
}

/// Formats the output stage can write; lower is preferred.
fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::I16 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        _ => None,
    }
}

fn cap_buffer(min: u32, max: u32) -> u32 {
    if max > MAX_BUFFER_FRAMES {
        min.max(MAX_BUFFER_FRAMES)
    } else {
        max
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
