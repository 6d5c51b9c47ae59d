//! Playback clocks
//!
//! The render tick asks the clock "what time is it in the stream" and selects
//! the frame due at that time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub trait PlaybackClock: Send + Sync {
    /// Current playback position
    fn now(&self) -> Duration;

    fn start(&self);

    /// Freeze the position
    fn stop(&self);

    /// Jump back to zero, keeping the running state
    fn reset(&self);

    fn is_running(&self) -> bool;
}

#[derive(Debug, Default)]
struct ClockState {
    running_since: Option<Instant>,
    accumulated: Duration,
}

/// Wall-clock playback position
#[derive(Debug, Default)]
pub struct MonotonicClock {
    state: Mutex<ClockState>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> Duration {
        let state = self.state();
        state.accumulated + state.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    fn start(&self) {
        let mut state = self.state();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn stop(&self) {
        let mut state = self.state();
        if let Some(since) = state.running_since.take() {
            state.accumulated += since.elapsed();
        }
    }

    fn reset(&self) {
        let mut state = self.state();
        state.accumulated = Duration::ZERO;
        if state.running_since.is_some() {
            state.running_since = Some(Instant::now());
        }
    }

    fn is_running(&self) -> bool {
        self.state().running_since.is_some()
    }
}

/// Position set explicitly, for tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    running: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, time: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    pub fn advance(&self, delta: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += delta;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn reset(&self) {
        self.set(Duration::ZERO);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
