//! Session window: a run ends after `gap` of per-key silence.

use std::sync::Arc;
use std::time::Duration;

use meshtopo_types::Timestamp;

use crate::{
    Admission, Batch, Event, GroupingWindow, Scheduler, WindowConfig, WindowError, WindowSnapshot,
    WindowStats,
};

/// Groups events per key into sessions separated by idle gaps.
///
/// Independent keys proceed on independent clocks. An event within
/// `[start, deadline]` extends its session. An event past the deadline
/// whose timer has not fired yet closes the old session and starts a new
/// one, so the closed session is returned from [`SessionWindow::admit`].
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use meshtopo_window::{EventTimeScheduler, SessionWindow};
///
/// let scheduler = Arc::new(EventTimeScheduler::new());
/// let window = SessionWindow::new(Duration::from_secs(5), scheduler).unwrap();
///
/// window.admit("user-1", 0, "login");
/// window.admit("user-1", 3_000, "search");
/// window.admit("user-1", 4_000, "logout");
///
/// let sessions = window.on_timer(9_000);
/// assert_eq!(sessions.len(), 1);
/// assert_eq!(sessions[0].len(), 3);
/// ```
#[derive(Debug)]
pub struct SessionWindow<P> {
    inner: GroupingWindow<P>,
}

impl<P> SessionWindow<P> {
    pub fn new(gap: Duration, scheduler: Arc<dyn Scheduler>) -> Result<Self, WindowError> {
        let inner = GroupingWindow::new("session", WindowConfig::session(gap), scheduler)?;
        Ok(Self { inner })
    }

    pub fn admit(&self, key: impl Into<String>, timestamp: Timestamp, payload: P) -> Admission<P> {
        self.inner.admit(Event::new(key, timestamp, payload))
    }

    pub fn on_timer(&self, now: Timestamp) -> Vec<Batch<P>> {
        self.inner.on_timer(now)
    }

    pub fn drain(&self) -> Vec<Batch<P>> {
        self.inner.drain()
    }

    pub fn gap_ms(&self) -> i64 {
        self.inner.config().gap_ms
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.next_deadline()
    }

    pub fn stats(&self) -> WindowStats {
        self.inner.stats()
    }

    pub fn snapshot(&self) -> WindowSnapshot<P>
    where
        P: Clone,
    {
        self.inner.snapshot()
    }

    pub fn restore(&self, snapshot: WindowSnapshot<P>) -> Result<usize, WindowError> {
        self.inner.restore(snapshot)
    }
}
