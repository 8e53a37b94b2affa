//! Shutdown signalling and bounded joins for background threads.
//!
//! Every background loop owns a receiver from the same `Shutdown` and sleeps
//! with `Shutdown::wait`, which returns as soon as the signal fires instead of
//! finishing the interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::warn;

/// A one-shot, broadcast shutdown signal.
///
/// Nothing is ever sent on the channel: triggering drops the only sender, so
/// every receiver observes disconnection at once.
pub struct Shutdown {
    flag: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            signal: rx,
        }
    }

    /// Fire the signal. Returns `true` only for the first call.
    pub fn trigger(&self) -> bool {
        if self.flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut trigger = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
        trigger.take();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`.
    ///
    /// Returns `true` if shutdown was signalled before or during the sleep.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            _ => true,
        }
    }

    /// A receiver that disconnects when the signal fires, for use in
    /// `crossbeam_channel::select!`.
    pub fn receiver(&self) -> Receiver<()> {
        self.signal.clone()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Join `handle`, giving up after `timeout`.
///
/// Returns `false` if the thread was still running at the deadline; it is
/// then left detached.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(thread = %name, timeout_ms = timeout.as_millis() as u64, "background thread did not stop in time; detaching");
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        warn!(thread = %name, "background thread panicked");
    }
    true
}
