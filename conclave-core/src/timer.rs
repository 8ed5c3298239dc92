//! Repeating timers for the event loop.
//!
//! A monotonic timer wheel owned by the reactor: no helper threads, no
//! queues. The reactor shortens its transport poll to the next due
//! time and fires due entries on the loop thread, so timer callbacks
//! observe the same serialization as transport events. When the loop
//! overruns, ticks coalesce: the next due time is re-armed from *now*,
//! missed ticks are never queued up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::Dispatcher;
use crate::transport::Transport;

/// A timer callback; runs on the loop thread with full access to the
/// dispatcher state.
pub type TimerCallback<T> = Box<dyn FnMut(&mut Dispatcher<T>) + Send>;

/// Cancel handle for a repeating timer.
///
/// Idempotent and safe to invoke from any thread; the entry is
/// reclaimed on the loop's next pass.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct TimerEntry<T: Transport> {
    interval: Duration,
    due: Instant,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback<T>,
}

/// The set of live repeating timers.
pub struct TimerWheel<T: Transport> {
    entries: Vec<TimerEntry<T>>,
}

impl<T: Transport> Default for TimerWheel<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Transport> TimerWheel<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` every `interval`, first fire one interval
    /// from now. Sub-millisecond intervals are clamped to 1ms.
    pub fn schedule_repeating(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut Dispatcher<T>) + Send + 'static,
    ) -> TimerHandle {
        let interval = interval.max(Duration::from_millis(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push(TimerEntry {
            interval,
            due: Instant::now() + interval,
            cancelled: cancelled.clone(),
            callback: Box::new(callback),
        });
        TimerHandle { cancelled }
    }

    /// The earliest due time among live timers.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .map(|e| e.due)
            .min()
    }

    /// Fire every due timer once and re-arm it from now.
    pub fn fire_due(&mut self, dispatcher: &mut Dispatcher<T>) {
        self.entries.retain(|e| !e.cancelled.load(Ordering::Acquire));
        let now = Instant::now();
        for entry in &mut self.entries {
            // a callback may cancel a sibling through its handle
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if entry.due <= now {
                (entry.callback)(dispatcher);
                entry.due = now + entry.interval;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
