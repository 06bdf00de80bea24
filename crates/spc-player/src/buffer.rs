//! Lookahead double buffering between the decoder and the output callback.
//!
//! [`PlaybackBuffers`] owns the decoder handle, the raw PCM scratch block and two
//! resampled blocks:
//! - a *ready* slot holding the next block, guarded by a "fresh" flag
//! - the staging block the prefetcher decodes into before publishing
//!
//! The output callback swaps the ready block into its own buffer and requests the
//! next prefetch without waiting for it. If the ready block is not fresh (the
//! prefetcher missed its deadline) the callback decodes synchronously and counts an
//! underrun; audio continues one block late.
//!
//! Lock order is always decoder slot, then ready slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::decoder::DecoderHandle;
use crate::error::PlayerError;
use crate::resample::{LinearResampler, ResampledBlock};

/// Where the block handed to the callback came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSource {
    /// Precomputed by the prefetcher.
    Lookahead,
    /// Decoded on the audio thread after a missed prefetch.
    Underrun,
    /// No decoder handle; the caller must output silence.
    Silent,
}

struct DecoderSlot {
    handle: Option<Box<dyn DecoderHandle>>,
    raw: Vec<i16>,
    staging: ResampledBlock,
    fault: Option<PlayerError>,
}

/// Result of [`PlaybackBuffers::fill_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub source: BlockSource,
    /// Handle generation the block was decoded from.
    pub generation: u64,
}

struct ReadySlot {
    block: ResampledBlock,
    fresh: bool,
    generation: u64,
}

/// Decoder handle plus raw/resampled buffers shared with the output callback.
pub struct PlaybackBuffers {
    resampler: LinearResampler,
    decoder: Mutex<DecoderSlot>,
    ready: Mutex<ReadySlot>,
    prefetch_tx: Sender<()>,
    prefetch_rx: Receiver<()>,
    underruns: AtomicU64,
    blocks_delivered: AtomicU64,
}

impl PlaybackBuffers {
    pub fn new(resampler: LinearResampler) -> Self {
        let (prefetch_tx, prefetch_rx) = crossbeam_channel::bounded(1);
        Self {
            decoder: Mutex::new(DecoderSlot {
                handle: None,
                raw: vec![0; resampler.raw_samples()],
                staging: resampler.new_block(),
                fault: None,
            }),
            ready: Mutex::new(ReadySlot {
                block: resampler.new_block(),
                fresh: false,
                generation: 0,
            }),
            resampler,
            prefetch_tx,
            prefetch_rx,
            underruns: AtomicU64::new(0),
            blocks_delivered: AtomicU64::new(0),
        }
    }

    pub fn resampler(&self) -> &LinearResampler {
        &self.resampler
    }

    /// Allocate a block shaped for [`Self::fill_next`].
    pub fn new_block(&self) -> ResampledBlock {
        self.resampler.new_block()
    }

    /// Replace the decoder handle and precompute the first block.
    ///
    /// The previous handle is dropped (released) before this returns, and any block
    /// computed from it is discarded.
    pub fn install(&self, handle: Box<dyn DecoderHandle>) -> Result<(), PlayerError> {
        {
            let mut dec = self.lock_decoder();
            let previous = dec.handle.replace(handle);
            dec.fault = None;
            self.invalidate_ready();
            drop(previous);
        }
        self.precompute()
    }

    /// Release the decoder handle. The callback outputs silence afterwards.
    pub fn clear(&self) {
        let mut dec = self.lock_decoder();
        let previous = dec.handle.take();
        self.invalidate_ready();
        if previous.is_some() {
            tracing::debug!("decoder handle released");
        }
    }

    /// Bumped whenever the handle is installed or cleared. Blocks from an older
    /// generation must not be played.
    pub fn generation(&self) -> u64 {
        self.lock_ready().generation
    }

    /// Decode and resample the next block into the ready slot, unless one is
    /// already waiting or no handle is installed.
    ///
    /// A decoder failure drops the handle and records a fault for
    /// [`Self::take_fault`].
    pub fn precompute(&self) -> Result<(), PlayerError> {
        let mut dec = self.lock_decoder();
        if dec.handle.is_none() || self.lock_ready().fresh {
            return Ok(());
        }

        let slot = &mut *dec;
        let mut staging = std::mem::take(&mut slot.staging);
        let result = Self::decode_into(&self.resampler, slot, &mut staging);
        match result {
            Ok(()) => {
                let mut ready = self.lock_ready();
                std::mem::swap(&mut ready.block, &mut staging);
                ready.fresh = true;
                drop(ready);
                dec.staging = staging;
                Ok(())
            }
            Err(e) => {
                dec.staging = staging;
                Err(e)
            }
        }
    }

    /// Hand the next block to the output callback.
    ///
    /// On [`BlockSource::Lookahead`] and [`BlockSource::Underrun`] `out` holds a
    /// complete block (its previous buffer is recycled as the next ready slot). On
    /// [`BlockSource::Silent`] `out` is untouched.
    pub fn fill_next(&self, out: &mut ResampledBlock) -> Delivery {
        if let Some(generation) = self.take_ready(out) {
            self.request_prefetch();
            return Delivery {
                source: BlockSource::Lookahead,
                generation,
            };
        }

        let mut dec = self.lock_decoder();
        let generation = self.lock_ready().generation;
        if dec.handle.is_none() {
            return Delivery {
                source: BlockSource::Silent,
                generation,
            };
        }
        // The prefetcher may have published while we waited for the decoder lock.
        if let Some(generation) = self.take_ready(out) {
            drop(dec);
            self.request_prefetch();
            return Delivery {
                source: BlockSource::Lookahead,
                generation,
            };
        }

        if Self::decode_into(&self.resampler, &mut dec, out).is_err() {
            return Delivery {
                source: BlockSource::Silent,
                generation,
            };
        }
        drop(dec);

        let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            underruns = count,
            "{}; lookahead block decoded on audio thread",
            PlayerError::BufferUnderrun
        );
        self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
        self.request_prefetch();
        Delivery {
            source: BlockSource::Underrun,
            generation,
        }
    }

    /// Number of blocks decoded on the audio thread.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Number of complete blocks handed to the output.
    pub fn blocks_delivered(&self) -> u64 {
        self.blocks_delivered.load(Ordering::Relaxed)
    }

    /// Take the error that stopped the decoder, if any.
    pub fn take_fault(&self) -> Option<PlayerError> {
        self.lock_decoder().fault.take()
    }

    fn take_ready(&self, out: &mut ResampledBlock) -> Option<u64> {
        let mut ready = self.lock_ready();
        if !ready.fresh {
            return None;
        }
        std::mem::swap(&mut ready.block, out);
        ready.fresh = false;
        self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
        Some(ready.generation)
    }

    /// Caller holds the decoder lock.
    fn invalidate_ready(&self) {
        let mut ready = self.lock_ready();
        ready.fresh = false;
        ready.generation = ready.generation.wrapping_add(1);
    }

    fn request_prefetch(&self) {
        // A full channel means a prefetch is already pending.
        let _ = self.prefetch_tx.try_send(());
    }

    fn decode_into(
        resampler: &LinearResampler,
        slot: &mut DecoderSlot,
        out: &mut ResampledBlock,
    ) -> Result<(), PlayerError> {
        let Some(handle) = slot.handle.as_mut() else {
            return Ok(());
        };
        if let Err(e) = handle.decode_block(&mut slot.raw) {
            return Err(Self::fail(slot, e.into()));
        }
        if let Err(e) = resampler.resample(&slot.raw, out) {
            return Err(Self::fail(slot, e.into()));
        }
        Ok(())
    }

    fn fail(slot: &mut DecoderSlot, err: PlayerError) -> PlayerError {
        tracing::error!("decode stage failed: {err}");
        slot.handle = None;
        slot.fault = Some(err.clone());
        err
    }

    fn lock_decoder(&self) -> std::sync::MutexGuard<'_, DecoderSlot> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_ready(&self) -> std::sync::MutexGuard<'_, ReadySlot> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Start the prefetch thread for `buffers`.
///
/// The thread waits for prefetch requests from the output callback and precomputes
/// the next block. It exits once the buffers are dropped.
pub fn spawn_prefetcher(buffers: &Arc<PlaybackBuffers>) -> thread::JoinHandle<()> {
    let weak: Weak<PlaybackBuffers> = Arc::downgrade(buffers);
    let rx = buffers.prefetch_rx.clone();
    thread::spawn(move || {
        while rx.recv().is_ok() {
            let Some(buffers) = weak.upgrade() else {
                break;
            };
            if let Err(e) = buffers.precompute() {
                tracing::warn!("prefetch failed: {e}");
            }
        }
        tracing::debug!("prefetcher exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderBackend;
    use crate::testing::{MockBackend, MockLog};
    use std::time::Duration;

    fn buffers() -> PlaybackBuffers {
        PlaybackBuffers::new(LinearResampler::new(32_000, 32_000, 2, 4))
    }

    fn load(backend: &MockBackend) -> Box<dyn DecoderHandle> {
        backend.load(&[1, 2, 3, 4]).unwrap()
    }

    #[test]
    fn empty_buffers_are_silent_and_leave_output_alone() {
        let buffers = buffers();
        let mut out = buffers.new_block();
        out.channel_mut(0).fill(0.5);
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Silent);
        assert!(out.channel(0).iter().all(|v| *v == 0.5));
    }

    #[test]
    fn install_precomputes_first_block() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();
        assert_eq!(backend.log().blocks(), 1);

        let mut out = buffers.new_block();
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Lookahead);
        assert_eq!(out.channel(0)[0], 1.0 / crate::resample::FULL_SCALE);
        assert_eq!(buffers.underruns(), 0);
    }

    #[test]
    fn missed_prefetch_decodes_synchronously_in_order() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();

        let mut out = buffers.new_block();
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Lookahead);
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Underrun);
        assert_eq!(buffers.underruns(), 1);
        assert_eq!(buffers.blocks_delivered(), 2);
        // Mock blocks carry their sequence number in every sample.
        assert_eq!(out.channel(1)[3], 2.0 / crate::resample::FULL_SCALE);
    }

    #[test]
    fn precompute_does_not_overwrite_fresh_block() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();
        buffers.precompute().unwrap();
        assert_eq!(backend.log().blocks(), 1);
    }

    #[test]
    fn reinstall_releases_previous_handle_and_discards_its_block() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();
        buffers.install(load(&backend)).unwrap();

        let log: MockLog = backend.log();
        assert_eq!(log.loads(), 2);
        assert_eq!(log.releases(), 1);

        let mut out = buffers.new_block();
        let delivery = buffers.fill_next(&mut out);
        assert_eq!(delivery.generation, buffers.generation());
        // Second handle restarts its own sequence at 1.
        assert_eq!(out.channel(0)[0], 1.0 / crate::resample::FULL_SCALE);
    }

    #[test]
    fn clear_releases_and_silences() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();
        buffers.clear();
        assert_eq!(backend.log().releases(), 1);
        assert_eq!(backend.log().live_handles(), 0);
        let mut out = buffers.new_block();
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Silent);
    }

    #[test]
    fn decoder_failure_drops_handle_and_records_fault() {
        let backend = MockBackend::ready();
        let buffers = buffers();
        buffers.install(load(&backend)).unwrap();
        backend.fail_decodes(true);

        let mut out = buffers.new_block();
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Lookahead);
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Silent);
        assert!(matches!(buffers.take_fault(), Some(PlayerError::Decode(_))));
        assert!(buffers.take_fault().is_none());
        assert_eq!(backend.log().releases(), 1);
    }

    #[test]
    fn prefetcher_refills_after_delivery() {
        let backend = MockBackend::ready();
        let buffers = Arc::new(buffers());
        let join = spawn_prefetcher(&buffers);
        buffers.install(load(&backend)).unwrap();

        let mut out = buffers.new_block();
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Lookahead);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while backend.log().blocks() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(buffers.fill_next(&mut out).source, BlockSource::Lookahead);
        assert_eq!(buffers.underruns(), 0);

        drop(buffers);
        join.join().unwrap();
    }
}
