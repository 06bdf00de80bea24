//! `spc-play`: plays raw chiptune track images through the real-time pipeline.
//!
//! Images are decoded by the PCM image backend, resampled to the device rate,
//! and rendered by a CPAL output stream. Each track ends at the fade after
//! `--duration`; the next path is then loaded. Ctrl-C or a playback error ends
//! the run.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::select;
use spc_player::config::{OutputSpec, PlayerConfig};
use spc_player::decoder::PcmImageBackend;
use spc_player::device;
use spc_player::output::CpalOutput;
use spc_player::player::{PlayerCommand, PlayerHandle, spawn_player};
use spc_player::track::{TrackMetadata, TrackSession, format_clock};
use spc_player::transport::PlayerEvent;
use spc_player::types::PlayerStatus;
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,spc_player=info")
        }))
        .init();
    let host = cpal::default_host();

    match args.cmd {
        cli::Command::ListDevices => {
            for (i, d) in device::list_devices(&host)?.iter().enumerate() {
                let marker = if d.is_default { " (default)" } else { "" };
                println!("#{i}: {}{marker} [{}-{} Hz]", d.name, d.min_rate, d.max_rate);
            }
        }
        cli::Command::Play {
            paths,
            track,
            output,
        } => play(&host, Playlist::new(paths, track), output)?,
    }

    Ok(())
}

/// Paths queued on the command line, played in order.
struct Playlist {
    paths: Vec<PathBuf>,
    files: Vec<String>,
    args: cli::TrackArgs,
    next: usize,
}

impl Playlist {
    fn new(paths: Vec<PathBuf>, args: cli::TrackArgs) -> Self {
        let files = paths.iter().map(|p| p.display().to_string()).collect();
        Self {
            paths,
            files,
            args,
            next: 0,
        }
    }

    /// Read the next queued track, or `None` once the list is exhausted.
    fn next_track(&mut self) -> Result<Option<TrackSession>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let session = read_track(path, &self.args)?.with_playlist(self.files.clone(), self.next);
        self.next += 1;
        Ok(Some(session))
    }
}

fn play(host: &cpal::Host, mut playlist: Playlist, output_args: cli::OutputArgs) -> Result<()> {
    let Some(session) = playlist.next_track()? else {
        bail!("no tracks to play");
    };
    let track_args = playlist.args.clone();
    let (device, selection) =
        device::select_output(host, output_args.device.as_deref(), output_args.rate)?;

    let config = PlayerConfig {
        block_frames: output_args.block_frames.max(1),
        initial_volume: output_args.volume,
        looping: track_args.looping,
        ..PlayerConfig::default()
    };
    let output = OutputSpec {
        sample_rate: selection.config.sample_rate,
        block_frames: config.block_frames,
    };
    let backend = Arc::new(PcmImageBackend::new(2));

    let stream_config = selection.config.clone();
    let sample_format = selection.sample_format;
    let player = spawn_player(backend, config, output, move |buffers, gain| {
        CpalOutput::open(&device, &stream_config, sample_format, buffers, gain)
    })
    .with_context(|| format!("open output on {}", selection.name))?;

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    let _ = ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    });

    player.send(PlayerCommand::Load {
        track: session,
        at: track_args.seek,
    })?;
    let outcome = run_until_done(&player, &mut playlist, &interrupt_rx, output_args.status_json);
    player.shutdown()?;
    outcome
}

fn read_track(path: &Path, args: &cli::TrackArgs) -> Result<TrackSession> {
    let image = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let metadata = TrackMetadata {
        title: args.title.clone(),
        game: args.game.clone(),
        author: args.author.clone(),
        comment: args.comment.clone(),
        date: args.date.clone(),
        duration_secs: args.duration,
        fade_ms: args.fade_ms,
    };
    Ok(TrackSession::new(filename, image, metadata))
}

/// Follow player events until the last track ends, playback fails, or the user
/// interrupts.
fn run_until_done(
    player: &PlayerHandle,
    playlist: &mut Playlist,
    interrupt_rx: &crossbeam_channel::Receiver<()>,
    status_json: bool,
) -> Result<()> {
    let ticker = crossbeam_channel::tick(STATUS_INTERVAL);
    loop {
        select! {
            recv(player.events()) -> event => {
                let Ok(event) = event else {
                    bail!("player worker exited");
                };
                match event {
                    PlayerEvent::Ready { title } => tracing::info!(title = %title, "playing"),
                    PlayerEvent::Ended => {
                        tracing::info!("track finished");
                        let Some(track) = playlist.next_track()? else {
                            return Ok(());
                        };
                        player.send(PlayerCommand::Load { track, at: 0.0 })?;
                    }
                    PlayerEvent::Error(message) => bail!(message),
                    other => tracing::debug!(event = ?other, "player event"),
                }
            },
            recv(interrupt_rx) -> _ => {
                tracing::info!("interrupted; stopping");
                player.send(PlayerCommand::Stop)?;
                return Ok(());
            },
            recv(ticker) -> _ => print_status(&player.status().snapshot(), status_json)?,
        }
    }
}

fn print_status(status: &PlayerStatus, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }
    let elapsed = status.elapsed_ms.unwrap_or(0) as f64 / 1000.0;
    let total = status
        .duration_ms
        .map(|ms| format_clock(ms as f64 / 1000.0))
        .unwrap_or_else(|| "--:--".into());
    let position = status
        .track_index
        .map(|i| format!("[{}/{}] ", i + 1, status.playlist.len()))
        .unwrap_or_default();
    println!(
        "{:?} {} / {} vol {:.2} underruns {} {position}{} {}",
        status.state,
        format_clock(elapsed),
        total,
        status.volume,
        status.underrun_events,
        status.now_playing.as_deref().unwrap_or(""),
        status.subtitle.as_deref().unwrap_or(""),
    );
    Ok(())
}
