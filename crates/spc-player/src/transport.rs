//! Transport controller: load/play/pause/stop/seek state machine and the
//! loop-boundary fade schedule.
//!
//! The transport owns the track session and the playback clock. Elapsed time is
//! the output graph clock minus a seek-adjusted start time, so pausing (which
//! suspends the graph) freezes it and seeking shifts it. Decoder handles live in
//! [`PlaybackBuffers`]; every reload releases the previous handle before the next
//! one is created.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::buffer::PlaybackBuffers;
use crate::config::PlayerConfig;
use crate::decoder::{BackendStatus, DecoderBackend};
use crate::error::{DecodeError, PlayerError};
use crate::gain::{GainControl, clamp_volume};
use crate::output::OutputGraph;
use crate::track::{TrackSession, display_names};
use crate::types::{PlaybackEndReason, PlayerStatus, TransportState};

/// Window after a loop boundary in which a tick schedules the fade (seconds).
const BOUNDARY_WINDOW_SECS: f64 = 1.0;

/// Lifecycle notifications for front-ends.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    LoadStart,
    Ready { title: String },
    Pause,
    Resume,
    Restart,
    Stop,
    Ended,
    /// User-facing error message.
    Error(String),
}

struct PendingLoad {
    track: TrackSession,
    at: f64,
    generation: u64,
}

#[derive(Debug, Default)]
struct FadeTimer {
    finish_at: Option<f64>,
    last_elapsed: f64,
}

impl FadeTimer {
    fn reset(&mut self, elapsed: f64) {
        self.finish_at = None;
        self.last_elapsed = elapsed;
    }
}

/// Playback state machine over an injected decoder backend and output graph.
pub struct Transport<G: OutputGraph> {
    backend: Arc<dyn DecoderBackend>,
    graph: G,
    buffers: Arc<PlaybackBuffers>,
    gain: Arc<GainControl>,
    events: Sender<PlayerEvent>,
    state: TransportState,
    session: Option<TrackSession>,
    pending: Option<PendingLoad>,
    load_generation: u64,
    started_at: f64,
    frozen_elapsed: f64,
    fade: FadeTimer,
    looping: bool,
    user_volume: f32,
    end_reason: Option<PlaybackEndReason>,
}

impl<G: OutputGraph> Transport<G> {
    pub fn new(
        backend: Arc<dyn DecoderBackend>,
        graph: G,
        buffers: Arc<PlaybackBuffers>,
        gain: Arc<GainControl>,
        config: &PlayerConfig,
        events: Sender<PlayerEvent>,
    ) -> Self {
        graph.suspend();
        let mut transport = Self {
            backend,
            graph,
            buffers,
            gain,
            events,
            state: TransportState::Unready,
            session: None,
            pending: None,
            load_generation: 0,
            started_at: 0.0,
            frozen_elapsed: 0.0,
            fade: FadeTimer::default(),
            looping: config.looping,
            user_volume: clamp_volume(config.initial_volume),
            end_reason: None,
        };
        let status = transport.backend.readiness().status();
        transport.on_backend_status(status);
        transport
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn session(&self) -> Option<&TrackSession> {
        self.session.as_ref()
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Load `track` and start playing at `at` seconds.
    ///
    /// An empty or malformed payload surfaces an error and leaves the current
    /// track untouched. While the backend is still initializing the request is
    /// parked; a later load or a stop supersedes it.
    pub fn load(&mut self, track: TrackSession, at: f64) -> Result<(), PlayerError> {
        if self.state.is_terminal() {
            return Err(self.report(PlayerError::BackendUnsupported));
        }
        if track.is_empty() {
            return Err(self.report(DecodeError::Empty.into()));
        }
        if let Err(e) = self.backend.validate(&track.image) {
            return Err(self.report(e.into()));
        }

        self.load_generation += 1;
        self.emit(PlayerEvent::LoadStart);
        let at = sanitize_position(at);

        if self.backend.readiness().status() != BackendStatus::Ready {
            tracing::info!(
                generation = self.load_generation,
                file = %track.filename,
                "backend not ready; load deferred"
            );
            self.pending = Some(PendingLoad {
                track,
                at,
                generation: self.load_generation,
            });
            self.state = TransportState::Loading;
            return Ok(());
        }

        self.pending = None;
        self.start(track, at, true, true)
    }

    /// Resume a paused track, or replay a finished/stopped one from the start.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        match self.state {
            TransportState::Paused => {
                self.graph.resume();
                self.state = TransportState::Playing;
                self.emit(PlayerEvent::Resume);
                Ok(())
            }
            TransportState::Finished | TransportState::Idle => {
                let track = self.session.clone().ok_or(PlayerError::NoTrack)?;
                self.start(track, 0.0, true, true)
            }
            TransportState::Playing | TransportState::Loading => Ok(()),
            TransportState::Unready => Err(PlayerError::BackendNotReady),
            TransportState::Unsupported | TransportState::Failed => {
                Err(self.report(PlayerError::BackendUnsupported))
            }
        }
    }

    /// Suspend the output graph. No samples are consumed while paused.
    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        self.graph.suspend();
        self.state = TransportState::Paused;
        self.emit(PlayerEvent::Pause);
    }

    /// Release the decoder, silence output and cancel any pending load.
    pub fn stop(&mut self) {
        self.load_generation += 1;
        self.pending = None;
        self.buffers.clear();
        self.graph.suspend();
        self.fade.reset(0.0);
        self.frozen_elapsed = 0.0;
        self.end_reason = Some(PlaybackEndReason::Stopped);
        self.state = match self.state {
            TransportState::Unsupported | TransportState::Failed => self.state,
            _ if self.backend.readiness().status() != BackendStatus::Ready => {
                TransportState::Unready
            }
            _ => TransportState::Idle,
        };
        self.emit(PlayerEvent::Stop);
    }

    /// Reload the current session positioned at `at` seconds.
    ///
    /// The decoder fast-forwards before producing its first block. A paused
    /// transport stays paused at the new position without the graph running in
    /// between. Emits no lifecycle notifications; only errors are reported.
    pub fn seek(&mut self, at: f64) -> Result<(), PlayerError> {
        let track = self.session.clone().ok_or(PlayerError::NoTrack)?;
        let was_paused = self.state == TransportState::Paused;
        self.start(track, sanitize_position(at), false, !was_paused)?;
        if was_paused {
            self.state = TransportState::Paused;
        }
        Ok(())
    }

    /// Reload the current session from 0.
    pub fn restart(&mut self) -> Result<(), PlayerError> {
        let track = self.session.clone().ok_or(PlayerError::NoTrack)?;
        self.start(track, 0.0, false, true)?;
        self.emit(PlayerEvent::Restart);
        Ok(())
    }

    /// Set the preferred volume, ramping over `ramp_secs`.
    pub fn set_volume(&mut self, value: f32, ramp_secs: f64) {
        self.user_volume = clamp_volume(value);
        self.gain
            .set_volume(value, ramp_secs, self.graph.current_time());
    }

    /// Last commanded volume.
    pub fn volume(&self) -> f32 {
        self.gain.volume()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Playback position in seconds.
    pub fn elapsed(&self) -> f64 {
        match self.state {
            TransportState::Playing | TransportState::Paused => {
                (self.graph.current_time() - self.started_at).max(0.0)
            }
            _ => self.frozen_elapsed,
        }
    }

    /// Periodic check for decoder faults, the loop-boundary fade and the
    /// scheduled finish.
    pub fn tick(&mut self) {
        if let Some(err) = self.buffers.take_fault() {
            self.fail(err);
            return;
        }
        if self.state != TransportState::Playing {
            return;
        }

        let elapsed = self.elapsed();
        let last = std::mem::replace(&mut self.fade.last_elapsed, elapsed);

        if let Some(finish_at) = self.fade.finish_at {
            if elapsed >= finish_at {
                self.finish(elapsed);
            }
            return;
        }

        if self.looping {
            return;
        }
        let Some(target) = self.session.as_ref().and_then(TrackSession::target_secs) else {
            return;
        };
        if !boundary_reached(elapsed, last, target) {
            return;
        }

        let fade = self.session.as_ref().map_or(0.0, TrackSession::fade_secs);
        let now = self.graph.current_time();
        self.fade.finish_at = Some(elapsed + fade);
        self.gain.set_volume(self.gain.volume(), 0.0, now);
        self.gain.set_volume(0.0, fade, now);
        tracing::info!(elapsed, target, fade_secs = fade, "loop boundary reached; fading out");
    }

    /// React to a readiness change from the decoder backend.
    pub fn on_backend_status(&mut self, status: BackendStatus) {
        match status {
            BackendStatus::Ready => {
                if self.state == TransportState::Unready {
                    self.state = TransportState::Idle;
                }
                let Some(pending) = self.pending.take() else {
                    return;
                };
                if pending.generation != self.load_generation {
                    tracing::debug!(generation = pending.generation, "stale pending load dropped");
                    return;
                }
                tracing::info!(generation = pending.generation, "backend ready; starting deferred load");
                if let Err(e) = self.start(pending.track, pending.at, true, true) {
                    tracing::debug!("deferred load failed: {e}");
                }
            }
            status if status.is_fatal() => {
                tracing::error!(status = status.as_raw(), "decoder backend unavailable");
                self.buffers.clear();
                self.graph.suspend();
                self.session = None;
                self.state = if status == BackendStatus::Unsupported {
                    TransportState::Unsupported
                } else {
                    TransportState::Failed
                };
                if self.pending.take().is_some() {
                    self.report(PlayerError::BackendUnsupported);
                }
            }
            _ => {}
        }
    }

    /// Snapshot for front-ends.
    pub fn status(&self) -> PlayerStatus {
        let resampler = self.buffers.resampler();
        let session = self.session.as_ref();
        PlayerStatus {
            state: self.state,
            now_playing: session.map(TrackSession::display_title),
            subtitle: session.map(TrackSession::subtitle).filter(|s| !s.is_empty()),
            date: session
                .map(|s| s.metadata.date.trim().to_string())
                .filter(|d| !d.is_empty()),
            playlist: session.map_or_else(Vec::new, |s| display_names(&s.files)),
            track_index: session.filter(|s| !s.files.is_empty()).map(|s| s.index),
            elapsed_ms: session.map(|_| (self.elapsed() * 1000.0) as u64),
            duration_ms: session
                .and_then(TrackSession::target_secs)
                .map(|s| (s * 1000.0) as u64),
            fade_ms: session.map(|s| s.metadata.fade_ms as u64),
            volume: self.gain.volume(),
            looping: self.looping,
            sample_rate: Some(resampler.output_rate()),
            source_rate: Some(resampler.source_rate()),
            block_frames: u32::try_from(resampler.out_frames()).ok(),
            underrun_events: self.buffers.underruns(),
            end_reason: self.end_reason,
        }
    }

    /// Open `track` at `at`, replacing whatever is playing. With `resume` unset
    /// the graph is left suspended.
    fn start(
        &mut self,
        track: TrackSession,
        at: f64,
        announce: bool,
        resume: bool,
    ) -> Result<(), PlayerError> {
        // Release before acquire: at most one live handle.
        self.buffers.clear();

        let mut handle = match self.backend.load(&track.image) {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(e.into())),
        };
        if at > 0.0 {
            handle.skip(Duration::from_secs_f64(at));
        }
        if let Err(e) = self.buffers.install(handle) {
            return Err(self.fail(e));
        }

        let now = self.graph.current_time();
        self.started_at = now - at;
        self.fade.reset(at);
        self.frozen_elapsed = 0.0;
        self.end_reason = None;

        // A previous fade may have left the gain at silence.
        let ramp = (self.gain.volume() - self.user_volume).abs() as f64 * 0.5;
        self.gain.set_volume(self.user_volume, ramp, now);

        let title = track.display_title();
        tracing::info!(
            title = %title,
            at,
            duration_secs = track.metadata.duration_secs,
            fade_ms = track.metadata.fade_ms,
            "track started"
        );
        self.session = Some(track);
        self.state = TransportState::Playing;
        if resume {
            self.graph.resume();
        }
        if announce {
            self.emit(PlayerEvent::Ready { title });
        }
        Ok(())
    }

    fn finish(&mut self, elapsed: f64) {
        self.buffers.clear();
        self.graph.suspend();
        self.frozen_elapsed = elapsed;
        self.fade.reset(elapsed);
        self.state = TransportState::Finished;
        self.end_reason = Some(PlaybackEndReason::Finished);
        tracing::info!(elapsed, "track finished");
        self.emit(PlayerEvent::Ended);
    }

    /// Leave the transport inert and surface `err`.
    fn fail(&mut self, err: PlayerError) -> PlayerError {
        self.frozen_elapsed = self.elapsed();
        self.buffers.clear();
        self.graph.suspend();
        self.fade.reset(0.0);
        if !self.state.is_terminal() {
            self.state = TransportState::Idle;
        }
        self.end_reason = Some(PlaybackEndReason::Error);
        self.report(err)
    }

    fn report(&self, err: PlayerError) -> PlayerError {
        tracing::warn!("playback error: {err}");
        self.emit(PlayerEvent::Error(err.user_message()));
        err
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// `true` when `elapsed` sits in the window just after a multiple of `target`,
/// or a multiple was crossed since the previous tick at `last`.
fn boundary_reached(elapsed: f64, last: f64, target: f64) -> bool {
    if elapsed <= 1.0 || target <= 0.0 {
        return false;
    }
    let in_window = elapsed % target <= BOUNDARY_WINDOW_SECS;
    let crossed = (elapsed / target).floor() > (last / target).floor();
    in_window || crossed
}

fn sanitize_position(at: f64) -> f64 {
    if at.is_finite() { at.max(0.0) } else { 0.0 }
}
