//! Decoder boundary.
//!
//! The native engine is opaque to the pipeline. It is reached through two traits:
//! - [`DecoderBackend`]: process-wide engine state (readiness, validation, loading)
//! - [`DecoderHandle`]: one loaded track image; dropping it releases the native state
//!
//! Readiness is pushed to subscribers through [`Readiness`] rather than polled.

mod pcm;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::DecodeError;

pub use pcm::PcmImageBackend;

/// Native sample rate of the decoder output (Hz).
pub const SOURCE_RATE: u32 = 32_000;

/// Backend lifecycle as reported by the native engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendStatus {
    /// Required platform primitives are missing.
    Unsupported,
    /// Initialization failed.
    Error,
    /// Still initializing.
    Uninitialized,
    /// Loads are accepted.
    Ready,
}

impl BackendStatus {
    /// Map the native status code (-2, -1, 0, 1).
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => Self::Ready,
            0 => Self::Uninitialized,
            -2 => Self::Unsupported,
            _ => Self::Error,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Unsupported => -2,
            Self::Error => -1,
            Self::Uninitialized => 0,
            Self::Ready => 1,
        }
    }

    /// Unsupported and error never recover.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Unsupported | Self::Error)
    }
}

/// Shared readiness cell with change notification.
pub struct Readiness {
    inner: Mutex<ReadinessInner>,
}

struct ReadinessInner {
    status: BackendStatus,
    subscribers: Vec<Sender<BackendStatus>>,
}

impl Readiness {
    pub fn new(status: BackendStatus) -> Self {
        Self {
            inner: Mutex::new(ReadinessInner {
                status,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn status(&self) -> BackendStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Update the status and notify subscribers when it changes.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub fn set(&self, status: BackendStatus) {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if g.status == status {
            return;
        }
        g.status = status;
        g.subscribers.retain(|tx| tx.send(status).is_ok());
        tracing::debug!(status = status.as_raw(), "decoder backend status changed");
    }

    /// Receive every future status change. The current status is delivered first.
    pub fn subscribe(&self) -> Receiver<BackendStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = tx.send(g.status);
        g.subscribers.push(tx);
        rx
    }
}

/// Process-wide decoder engine.
pub trait DecoderBackend: Send + Sync {
    /// Sample rate of decoded blocks.
    fn source_rate(&self) -> u32 {
        SOURCE_RATE
    }

    /// Interleaved channel count of decoded blocks.
    fn channels(&self) -> usize {
        2
    }

    fn readiness(&self) -> &Readiness;

    /// Cheap check that `image` can be opened, without creating a handle.
    ///
    /// Runs before the current handle is released so a bad payload leaves the
    /// playing track untouched.
    fn validate(&self, image: &[u8]) -> Result<(), DecodeError> {
        if image.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(())
    }

    /// Open a track image positioned at time 0.
    fn load(&self, image: &[u8]) -> Result<Box<dyn DecoderHandle>, DecodeError>;
}

/// One loaded track image. Dropping the handle releases its native state.
pub trait DecoderHandle: Send {
    /// Fill `out` with the next `out.len() / channels` interleaved frames.
    fn decode_block(&mut self, out: &mut [i16]) -> Result<(), DecodeError>;

    /// Fast-forward by `elapsed` without producing output.
    fn skip(&mut self, elapsed: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for code in [-2, -1, 0, 1] {
            assert_eq!(BackendStatus::from_raw(code).as_raw(), code);
        }
        assert_eq!(BackendStatus::from_raw(-7), BackendStatus::Error);
    }

    #[test]
    fn subscribe_delivers_current_then_changes() {
        let readiness = Readiness::new(BackendStatus::Uninitialized);
        let rx = readiness.subscribe();
        readiness.set(BackendStatus::Uninitialized);
        readiness.set(BackendStatus::Ready);

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![BackendStatus::Uninitialized, BackendStatus::Ready]
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let readiness = Readiness::new(BackendStatus::Uninitialized);
        drop(readiness.subscribe());
        readiness.set(BackendStatus::Ready);
        let g = readiness.inner.lock().unwrap();
        assert!(g.subscribers.is_empty());
    }

    #[test]
    fn fatal_statuses() {
        assert!(BackendStatus::Unsupported.is_fatal());
        assert!(BackendStatus::Error.is_fatal());
        assert!(!BackendStatus::Uninitialized.is_fatal());
    }
}
