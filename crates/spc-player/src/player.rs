//! Player worker thread.
//!
//! Owns the [`Transport`] and its output graph. Commands arrive over a crossbeam
//! channel; backend readiness changes and the periodic transport tick are
//! multiplexed with them in one `select!`. After every wakeup the worker
//! publishes a fresh [`PlayerStatus`](crate::types::PlayerStatus).

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};

use crate::buffer::{PlaybackBuffers, spawn_prefetcher};
use crate::config::{OutputSpec, PlayerConfig};
use crate::decoder::{BackendStatus, DecoderBackend};
use crate::gain::GainControl;
use crate::output::OutputGraph;
use crate::resample::LinearResampler;
use crate::status::StatusStore;
use crate::track::TrackSession;
use crate::transport::{PlayerEvent, Transport};

/// Commands accepted by the player worker.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Load { track: TrackSession, at: f64 },
    Play,
    Pause,
    Stop,
    Seek { secs: f64 },
    Restart,
    SetVolume { value: f32, ramp_secs: f64 },
    SetLooping(bool),
    Shutdown,
}

/// Handle for driving the player worker.
pub struct PlayerHandle {
    cmd_tx: Sender<PlayerCommand>,
    events: Receiver<PlayerEvent>,
    status: StatusStore,
    join: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn send(&self, cmd: PlayerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| anyhow!("player worker exited"))
    }

    /// Lifecycle notifications in the order the transport produced them.
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// Ask the worker to exit and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        join.join().map_err(|_| anyhow!("player worker panicked"))
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            tracing::warn!("{e}");
        }
    }
}

/// Spawn the player worker.
///
/// `open_graph` runs on the worker thread (output streams are not always `Send`)
/// and receives the buffers and gain stage the graph must render from. Returns
/// once the graph is open, or with its error.
pub fn spawn_player<G, F>(
    backend: Arc<dyn DecoderBackend>,
    config: PlayerConfig,
    output: OutputSpec,
    open_graph: F,
) -> Result<PlayerHandle>
where
    G: OutputGraph + 'static,
    F: FnOnce(Arc<PlaybackBuffers>, Arc<GainControl>) -> Result<G> + Send + 'static,
{
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let (event_tx, events) = crossbeam_channel::unbounded();
    let (opened_tx, opened_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let status = StatusStore::new();
    let worker_status = status.clone();

    let join = std::thread::spawn(move || {
        let resampler = LinearResampler::new(
            backend.source_rate(),
            output.sample_rate,
            backend.channels(),
            output.block_frames,
        );
        tracing::info!(
            source_rate = resampler.source_rate(),
            output_rate = resampler.output_rate(),
            block_frames = resampler.out_frames(),
            raw_frames = resampler.raw_frames(),
            ratio = resampler.ratio(),
            "playback pipeline configured"
        );
        let buffers = Arc::new(PlaybackBuffers::new(resampler));
        let gain = Arc::new(GainControl::new(config.initial_volume));
        let graph = match open_graph(buffers.clone(), gain.clone()) {
            Ok(graph) => graph,
            Err(e) => {
                let _ = opened_tx.send(Err(e));
                return;
            }
        };
        let _prefetcher = spawn_prefetcher(&buffers);
        let readiness = backend.readiness().subscribe();
        let transport = Transport::new(backend, graph, buffers, gain, &config, event_tx);
        let _ = opened_tx.send(Ok(()));
        player_thread_main(transport, &config, cmd_rx, readiness, worker_status);
    });

    opened_rx
        .recv()
        .context("player worker exited during startup")??;

    Ok(PlayerHandle {
        cmd_tx,
        events,
        status,
        join: Some(join),
    })
}

fn player_thread_main<G: OutputGraph>(
    mut transport: Transport<G>,
    config: &PlayerConfig,
    cmd_rx: Receiver<PlayerCommand>,
    readiness: Receiver<BackendStatus>,
    status: StatusStore,
) {
    let ticker = crossbeam_channel::tick(config.tick_interval);
    let closed = crossbeam_channel::never();
    let mut readiness_open = true;
    status.publish(transport.status());

    loop {
        crossbeam_channel::select! {
            recv(cmd_rx) -> msg => match msg {
                Ok(PlayerCommand::Shutdown) | Err(_) => break,
                Ok(cmd) => apply(&mut transport, cmd),
            },
            recv(if readiness_open { &readiness } else { &closed }) -> msg => match msg {
                Ok(backend_status) => transport.on_backend_status(backend_status),
                Err(_) => readiness_open = false,
            },
            recv(ticker) -> _ => transport.tick(),
        }
        status.publish(transport.status());
    }

    transport.stop();
    status.publish(transport.status());
    tracing::info!("player worker exited");
}

fn apply<G: OutputGraph>(transport: &mut Transport<G>, cmd: PlayerCommand) {
    let result = match cmd {
        PlayerCommand::Load { track, at } => {
            tracing::info!(file = %track.filename, at, "load received");
            transport.load(track, at)
        }
        PlayerCommand::Play => transport.play(),
        PlayerCommand::Pause => {
            transport.pause();
            Ok(())
        }
        PlayerCommand::Stop => {
            transport.stop();
            Ok(())
        }
        PlayerCommand::Seek { secs } => transport.seek(secs),
        PlayerCommand::Restart => transport.restart(),
        PlayerCommand::SetVolume { value, ramp_secs } => {
            transport.set_volume(value, ramp_secs);
            Ok(())
        }
        PlayerCommand::SetLooping(looping) => {
            transport.set_looping(looping);
            Ok(())
        }
        PlayerCommand::Shutdown => Ok(()),
    };
    if let Err(e) = result {
        tracing::debug!("command rejected: {e}");
    }
}
