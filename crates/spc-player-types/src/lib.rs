use serde::{Deserialize, Serialize};

/// Transport state reported to front-ends.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Decoder backend has not reported readiness yet.
    #[default]
    Unready,
    /// Platform lacks the primitives the backend needs. Terminal.
    Unsupported,
    /// Backend failed to initialize. Terminal.
    Failed,
    /// Backend ready, nothing loaded.
    Idle,
    /// A load was requested and is waiting for the backend.
    Loading,
    /// Audio is being rendered.
    Playing,
    /// Output graph suspended; position frozen.
    Paused,
    /// Track reached its scheduled end (fade complete).
    Finished,
}

impl TransportState {
    /// `true` for states where no load can ever succeed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unsupported | Self::Failed)
    }
}

/// Reason why the last track stopped producing audio.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Fade-out at the loop boundary completed.
    Finished,
    /// Decoder failed mid-stream.
    Error,
    /// Playback was explicitly stopped by a command.
    Stopped,
}

/// Point-in-time playback status published by the player worker.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Current transport state.
    pub state: TransportState,
    /// Display title of the loaded track, if any.
    pub now_playing: Option<String>,
    /// Author and comment line; absent when both are blank.
    pub subtitle: Option<String>,
    /// Date field from the track header; absent when blank.
    pub date: Option<String>,
    /// Playlist labels with the shared directory prefix stripped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playlist: Vec<String>,
    /// Index of the loaded track in `playlist`.
    pub track_index: Option<usize>,
    /// Playback clock in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Target track duration in milliseconds (0 or missing when unknown).
    pub duration_ms: Option<u64>,
    /// Fade-out length in milliseconds.
    pub fade_ms: Option<u64>,
    /// Last commanded volume in `[0, 1.5]`.
    pub volume: f32,
    /// Whether loop-boundary fades are suppressed.
    pub looping: bool,
    /// Output device sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Decoder source sample rate (Hz).
    pub source_rate: Option<u32>,
    /// Resampled block length in frames.
    pub block_frames: Option<u32>,
    /// Blocks that had to be decoded on the audio thread.
    pub underrun_events: u64,
    /// End reason when playback transitions out of `Playing`.
    pub end_reason: Option<PlaybackEndReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_state_serializes_snake_case() {
        let json = serde_json::to_string(&TransportState::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
    }

    #[test]
    fn terminal_states() {
        assert!(TransportState::Unsupported.is_terminal());
        assert!(TransportState::Failed.is_terminal());
        assert!(!TransportState::Idle.is_terminal());
        assert!(!TransportState::Finished.is_terminal());
    }

    #[test]
    fn status_defaults_to_unready() {
        let status = PlayerStatus::default();
        assert_eq!(status.state, TransportState::Unready);
        assert!(status.end_reason.is_none());
        assert!(status.playlist.is_empty());
    }

    #[test]
    fn empty_playlist_is_omitted_from_json() {
        let json = serde_json::to_value(PlayerStatus::default()).unwrap();
        assert!(json.get("playlist").is_none());
        let back: PlayerStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, PlayerStatus::default());
    }
}
