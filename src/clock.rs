//! Injectable time source.
//!
//! All pipeline components that compare or record times take a
//! [`ClockSource`] instead of calling `Instant::now()` directly, so tests
//! can drive debounce windows and cache timestamps deterministically.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic + wall time provider.
pub trait ClockSource: Send + Sync {
    /// Monotonic instant for interval arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock timestamp for recorded results.
    fn wall(&self) -> DateTime<Utc>;
}

/// Production clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-advanced clock for tests.
///
/// Starts at an arbitrary base instant; `advance` moves both the monotonic
/// and wall readings forward.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    state: Arc<Mutex<ManualState>>,
}

struct ManualState {
    offset: Duration,
    wall: DateTime<Utc>,
}

impl ManualClock {
    /// Create a manual clock anchored at the given wall time.
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            base: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                offset: Duration::ZERO,
                wall,
            })),
        }
    }

    /// Advance both readings by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock().unwrap();
        state.offset += delta;
        state.wall += chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Instant {
        let state = self.state.lock().unwrap();
        self.base + state.offset
    }

    fn wall(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().wall
    }
}
