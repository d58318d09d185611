//! The timer capability and its implementations.
//!
//! Combinators never sleep directly. They ask the injected [`Timer`] to run a
//! callback later and hold on to the returned [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a callback to run once after a delay.
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> CancelToken;
}

impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> CancelToken {
        (**self).schedule(delay, callback)
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Aborts a scheduled callback before it fires. Cancelling after it fired is a no-op.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl CancelToken {
    /// A token backed only by a shared flag the timer checks before firing.
    pub fn from_flag(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            abort: None,
        }
    }

    /// A token that also aborts the tokio task driving the timer.
    pub fn from_task(abort: AbortHandle) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: Some(abort),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// TokioTimer (production)
// ---------------------------------------------------------------------------

/// Default timer: one `tokio::time::sleep` task per callback.
///
/// Follows tokio's clock, so `#[tokio::test(start_paused = true)]` drives it
/// deterministically. Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> CancelToken {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        CancelToken::from_task(handle.abort_handle())
    }
}

// ---------------------------------------------------------------------------
// ManualTimer (tests: virtual clock)
// ---------------------------------------------------------------------------

struct Scheduled {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    pending: Vec<Scheduled>,
}

impl ManualClock {
    /// Remove and return the earliest live entry due at or before `now`.
    fn pop_due(&mut self) -> Option<Scheduled> {
        self.pending
            .retain(|s| !s.cancelled.load(Ordering::SeqCst));
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= self.now)
            .min_by_key(|(_, s)| (s.due, s.seq))
            .map(|(i, _)| i)?;
        Some(self.pending.swap_remove(idx))
    }
}

/// Virtual clock that only moves when told to. Thread-safe.
///
/// Callbacks fire synchronously inside [`advance`](Self::advance), in due-time
/// order, ties broken by scheduling order.
#[derive(Default)]
pub struct ManualTimer {
    clock: Mutex<ManualClock>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of scheduled callbacks that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|s| !s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move the clock forward and fire everything that came due. Returns how many fired.
    ///
    /// Callbacks run without the clock locked, so they may schedule more timers;
    /// those fire in the same call if they are due too.
    pub fn advance(&self, by: Duration) -> usize {
        self.lock().now += by;

        let mut fired = 0;
        loop {
            let Some(entry) = self.lock().pop_due() else {
                break;
            };
            (entry.callback)();
            fired += 1;
        }

        if fired > 0 {
            debug!(fired, now_ms = self.now().as_millis() as u64, "Manual timer advanced");
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> CancelToken {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut clock = self.lock();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now + delay;
        clock.pending.push(Scheduled {
            due,
            seq,
            cancelled: cancelled.clone(),
            callback,
        });
        CancelToken::from_flag(cancelled)
    }
}
