//! Test doubles: a call-recording decoder backend and a manually clocked output graph.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::decoder::{BackendStatus, DecoderBackend, DecoderHandle, Readiness};
use crate::error::DecodeError;
use crate::output::OutputGraph;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum MockCall {
    Load(u64),
    Skip(u64, Duration),
    Decode(u64),
    Release(u64),
}

/// Shared record of every decoder call, in order.
#[derive(Clone, Default)]
pub(crate) struct MockLog {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockLog {
    fn push(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn loads(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Load(_)))
    }

    pub(crate) fn releases(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Release(_)))
    }

    pub(crate) fn blocks(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Decode(_)))
    }

    pub(crate) fn skips(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCall::Skip(_, d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.loads() - self.releases()
    }
}

/// Decoder backend whose blocks carry a per-handle sequence number in every sample.
pub(crate) struct MockBackend {
    readiness: Readiness,
    log: MockLog,
    next_id: AtomicU64,
    fail_decodes: Arc<AtomicBool>,
    fail_loads: AtomicBool,
}

impl MockBackend {
    pub(crate) fn ready() -> Self {
        Self::with_status(BackendStatus::Ready)
    }

    pub(crate) fn with_status(status: BackendStatus) -> Self {
        Self {
            readiness: Readiness::new(status),
            log: MockLog::default(),
            next_id: AtomicU64::new(0),
            fail_decodes: Arc::new(AtomicBool::new(false)),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub(crate) fn log(&self) -> MockLog {
        self.log.clone()
    }

    pub(crate) fn set_status(&self, status: BackendStatus) {
        self.readiness.set(status);
    }

    pub(crate) fn fail_decodes(&self, fail: bool) {
        self.fail_decodes.store(fail, Ordering::Relaxed);
    }

    /// Make `load` fail after `validate` has accepted the image.
    pub(crate) fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Relaxed);
    }
}

impl DecoderBackend for MockBackend {
    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    fn validate(&self, image: &[u8]) -> Result<(), DecodeError> {
        match image.first() {
            None => Err(DecodeError::Empty),
            Some(0xFF) => Err(DecodeError::Malformed("bad header".into())),
            Some(_) => Ok(()),
        }
    }

    fn load(&self, image: &[u8]) -> Result<Box<dyn DecoderHandle>, DecodeError> {
        self.validate(image)?;
        if self.fail_loads.load(Ordering::Relaxed) {
            return Err(DecodeError::Decoder("engine rejected image".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.log.push(MockCall::Load(id));
        Ok(Box::new(MockHandle {
            id,
            seq: 0,
            log: self.log.clone(),
            fail: self.fail_decodes.clone(),
        }))
    }
}

struct MockHandle {
    id: u64,
    seq: i16,
    log: MockLog,
    fail: Arc<AtomicBool>,
}

impl DecoderHandle for MockHandle {
    fn decode_block(&mut self, out: &mut [i16]) -> Result<(), DecodeError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(DecodeError::Decoder("mock failure".into()));
        }
        self.seq += 1;
        self.log.push(MockCall::Decode(self.id));
        out.fill(self.seq);
        Ok(())
    }

    fn skip(&mut self, elapsed: Duration) {
        self.log.push(MockCall::Skip(self.id, elapsed));
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.log.push(MockCall::Release(self.id));
    }
}

/// Output graph whose clock only moves when the test advances it.
#[derive(Clone)]
pub(crate) struct ManualGraph {
    inner: Arc<ManualInner>,
}

struct ManualInner {
    time: Mutex<f64>,
    running: AtomicBool,
    transitions: Mutex<Vec<&'static str>>,
}

impl ManualGraph {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ManualInner {
                time: Mutex::new(0.0),
                running: AtomicBool::new(false),
                transitions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Advance the device clock by `secs` if the graph is running.
    pub(crate) fn advance(&self, secs: f64) {
        if self.inner.running.load(Ordering::Relaxed) {
            *self.inner.time.lock().unwrap() += secs;
        }
    }

    /// `"suspend"`/`"resume"` calls since the last call to this method.
    pub(crate) fn take_transitions(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.inner.transitions.lock().unwrap())
    }
}

impl OutputGraph for ManualGraph {
    fn current_time(&self) -> f64 {
        *self.inner.time.lock().unwrap()
    }

    fn suspend(&self) {
        self.inner.transitions.lock().unwrap().push("suspend");
        self.inner.running.store(false, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.inner.transitions.lock().unwrap().push("resume");
        self.inner.running.store(true, Ordering::Relaxed);
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }
}
