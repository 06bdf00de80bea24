//! Output gain stage and volume controller.
//!
//! Gain follows the output graph clock: a [`GainCurve`] is either a constant or an
//! exponential ramp between two points in time. The audio callback snapshots the
//! curve once per block and evaluates it per sample; the control side re-targets
//! it at any time, starting each new ramp from the value the curve has *now*.

use std::sync::{Mutex, PoisonError};

/// Upper bound of the volume range.
pub const MAX_VOLUME: f32 = 1.5;

/// Floor for exponential ramp endpoints (a geometric ramp cannot reach 0).
pub const MIN_RAMP_VALUE: f32 = 0.01;

/// Ramps at or below this length (seconds) are applied as a step.
pub const RAMP_THRESHOLD_SECS: f64 = 0.02;

/// Clamp a commanded volume into `[0, MAX_VOLUME]`. Non-finite input maps to 0.
pub fn clamp_volume(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, MAX_VOLUME)
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Ramp {
    start_value: f32,
    start_time: f64,
    target: f32,
    end_time: f64,
}

/// Gain as a function of output graph time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainCurve {
    value: f32,
    ramp: Option<Ramp>,
}

impl GainCurve {
    pub fn constant(value: f32) -> Self {
        Self {
            value: clamp_volume(value),
            ramp: None,
        }
    }

    /// Gain at graph time `t` (seconds).
    pub fn value_at(&self, t: f64) -> f32 {
        let Some(r) = self.ramp else {
            return self.value;
        };
        if t >= r.end_time {
            return r.target;
        }
        if t <= r.start_time {
            return r.start_value;
        }
        let progress = (t - r.start_time) / (r.end_time - r.start_time);
        let ratio = r.target as f64 / r.start_value as f64;
        (r.start_value as f64 * ratio.powf(progress)) as f32
    }

    /// Value the curve settles at.
    pub fn target(&self) -> f32 {
        self.ramp.map_or(self.value, |r| r.target)
    }

    /// End time of the active ramp, if any.
    pub fn ramp_end(&self) -> Option<f64> {
        self.ramp.map(|r| r.end_time)
    }

    fn exponential(start: f32, now: f64, target: f32, end_time: f64) -> Self {
        Self {
            value: target,
            ramp: Some(Ramp {
                start_value: start.clamp(MIN_RAMP_VALUE, MAX_VOLUME),
                start_time: now,
                target: target.clamp(MIN_RAMP_VALUE, MAX_VOLUME),
                end_time,
            }),
        }
    }
}

struct GainInner {
    curve: GainCurve,
    commanded: f32,
}

/// Shared volume state between the control thread and the audio callback.
pub struct GainControl {
    inner: Mutex<GainInner>,
}

impl GainControl {
    pub fn new(initial: f32) -> Self {
        let initial = clamp_volume(initial);
        Self {
            inner: Mutex::new(GainInner {
                curve: GainCurve::constant(initial),
                commanded: initial,
            }),
        }
    }

    /// Command a new volume at graph time `now`.
    ///
    /// Ramps shorter than [`RAMP_THRESHOLD_SECS`] become an immediate step. Longer
    /// ramps approach `max(value, MIN_RAMP_VALUE)` exponentially, starting from the
    /// curve's current value so an in-flight ramp is re-targeted without a jump.
    pub fn set_volume(&self, value: f32, ramp_secs: f64, now: f64) {
        let value = clamp_volume(value);
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.commanded = value;
        if !(ramp_secs > RAMP_THRESHOLD_SECS) {
            g.curve = GainCurve::constant(value);
            return;
        }
        let start = g.curve.value_at(now);
        g.curve = GainCurve::exponential(start, now, value, now + ramp_secs);
    }

    /// Last commanded volume, clamped. Not the instantaneous gain.
    pub fn volume(&self) -> f32 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commanded
    }

    /// Copy of the current curve for per-sample evaluation.
    pub fn snapshot(&self) -> GainCurve {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .curve
    }

    /// Instantaneous gain at graph time `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        self.snapshot().value_at(t)
    }
}
