use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "spc-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    ListDevices,

    /// Play raw 32 kHz stereo track images (little-endian i16) in order
    Play {
        /// Paths to the track images
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        track: TrackArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Track header fields supplied on the command line.
#[derive(ClapArgs, Debug, Clone)]
pub struct TrackArgs {
    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long, default_value = "")]
    pub game: String,

    #[arg(long, default_value = "")]
    pub author: String,

    #[arg(long, default_value = "")]
    pub comment: String,

    #[arg(long, default_value = "")]
    pub date: String,

    /// Seconds before the fade-out starts (0 = play until stopped)
    #[arg(long, default_value_t = 0)]
    pub duration: u32,

    /// Fade-out length in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub fade_ms: u32,

    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    pub seek: f64,

    /// Ignore the duration and keep looping
    #[arg(long = "loop")]
    pub looping: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OutputArgs {
    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz (device default when unset)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Resampled block length in frames (higher => fewer decoder wakeups, more latency)
    #[arg(long, default_value_t = 16_384)]
    pub block_frames: usize,

    /// Initial volume in [0, 1.5]
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Print status snapshots as JSON lines instead of text
    #[arg(long)]
    pub status_json: bool,
}
