//! Blocking waits and cancellation.
//!
//! The dump controller never calls `thread::sleep` directly; it goes
//! through a [`Sleeper`] so tests can observe every backoff.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Something that can block the current thread.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
    stop_after: Option<(usize, StopFlag)>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `stop` once `count` sleeps have been recorded.
    pub fn stopping_after(count: usize, stop: StopFlag) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            stop_after: Some((count, stop)),
        }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.push(duration);
        if let Some((count, stop)) = &self.stop_after
            && calls.len() >= *count
        {
            stop.request_stop();
        }
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so one can be handed to a signal handler or
/// another thread while the controller polls its own copy.
#[derive(Debug, Default, Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
