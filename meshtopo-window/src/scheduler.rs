//! Event-time timers and clocks.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

use meshtopo_types::{current_timestamp_ms, Timestamp};
use parking_lot::Mutex;

/// Receives "wake me at" requests from a window.
///
/// The host decides when to call the window's `on_timer`. It must never do
/// so for a requested instant before event time has reached it, and it may
/// do so arbitrarily later.
pub trait Scheduler: Send + Sync + Debug {
    fn notify_at(&self, at: Timestamp);
}

/// Collects wakeup requests ordered by time.
///
/// Requests for the same instant collapse into one.
///
/// ```rust
/// use meshtopo_window::{EventTimeScheduler, Scheduler};
///
/// let scheduler = EventTimeScheduler::new();
/// scheduler.notify_at(9_000);
/// scheduler.notify_at(9_000);
/// scheduler.notify_at(4_000);
///
/// assert_eq!(scheduler.pending(), 2);
/// assert!(!scheduler.due(3_999));
/// assert!(scheduler.due(5_000));
/// assert_eq!(scheduler.next_wakeup(), Some(9_000));
/// ```
#[derive(Debug, Default)]
pub struct EventTimeScheduler {
    wakeups: Mutex<BTreeSet<Timestamp>>,
}

impl EventTimeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume every wakeup at or before `now`. Returns true if any was due.
    pub fn due(&self, now: Timestamp) -> bool {
        let mut wakeups = self.wakeups.lock();
        match wakeups.first() {
            Some(first) if *first <= now => {
                *wakeups = match now.checked_add(1) {
                    Some(after) => wakeups.split_off(&after),
                    None => BTreeSet::new(),
                };
                true
            }
            _ => false,
        }
    }

    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.wakeups.lock().first().copied()
    }

    pub fn pending(&self) -> usize {
        self.wakeups.lock().len()
    }
}

impl Scheduler for EventTimeScheduler {
    fn notify_at(&self, at: Timestamp) {
        self.wakeups.lock().insert(at);
    }
}

/// Source of "now" in event-time milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        current_timestamp_ms()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) -> Timestamp {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Monotonic event time: the later of the highest event timestamp seen and
/// the idle clock.
#[derive(Debug)]
pub struct Watermark {
    high: AtomicI64,
}

impl Watermark {
    pub fn new() -> Self {
        Self {
            high: AtomicI64::new(Timestamp::MIN),
        }
    }

    /// Record an observed timestamp and return the resulting watermark.
    pub fn observe(&self, ts: Timestamp) -> Timestamp {
        self.high.fetch_max(ts, Ordering::SeqCst).max(ts)
    }

    pub fn current(&self) -> Timestamp {
        self.high.load(Ordering::SeqCst)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_consumes_only_elapsed_wakeups() {
        let scheduler = EventTimeScheduler::new();
        for at in [30, 10, 20, 10] {
            scheduler.notify_at(at);
        }
        assert_eq!(scheduler.pending(), 3);

        assert!(scheduler.due(20));
        assert_eq!(scheduler.pending(), 1);
        assert!(!scheduler.due(29));
        assert!(scheduler.due(Timestamp::MAX));
        assert_eq!(scheduler.next_wakeup(), None);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.advance(500), 1_500);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }

    #[test]
    fn test_watermark_never_regresses() {
        let watermark = Watermark::new();
        assert_eq!(watermark.observe(100), 100);
        assert_eq!(watermark.observe(40), 100);
        assert_eq!(watermark.observe(150), 150);
        assert_eq!(watermark.current(), 150);
    }
}
