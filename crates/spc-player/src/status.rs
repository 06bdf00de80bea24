use std::sync::{Arc, Mutex, PoisonError};

use crate::types::PlayerStatus;

/// Latest status published by the player worker, readable from any thread.
#[derive(Clone, Debug, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<PlayerStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot.
    pub fn publish(&self, status: PlayerStatus) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Copy of the latest snapshot.
    pub fn snapshot(&self) -> PlayerStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
