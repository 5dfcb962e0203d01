//! Trace-group window: gathers all spans of a trace before releasing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshtopo_types::{Span, Timestamp};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    Admission, Batch, Event, GroupingWindow, Scheduler, WindowConfig, WindowError, WindowSnapshot,
    WindowStats,
};

/// Groups spans by trace id and releases a trace after `idle` without new spans.
///
/// Every admitted span is also forwarded right away on a bounded
/// pass-through channel, so low-latency consumers do not wait for the
/// trace to go idle. Forwarding is best effort: when the channel is full
/// or closed the span is counted as dropped and admission carries on.
#[derive(Debug)]
pub struct TraceGroupWindow {
    inner: GroupingWindow<Span>,
    passthrough: Option<mpsc::Sender<Span>>,
    dropped: AtomicU64,
}

impl TraceGroupWindow {
    /// Create a window and the receiving end of its pass-through path.
    pub fn new(
        idle: Duration,
        scheduler: Arc<dyn Scheduler>,
        passthrough_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<Span>), WindowError> {
        let (tx, rx) = mpsc::channel(passthrough_buffer.max(1));
        let window = Self::build(idle, scheduler, Some(tx))?;
        Ok((window, rx))
    }

    /// Create a window with no pass-through path.
    pub fn without_passthrough(
        idle: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, WindowError> {
        Self::build(idle, scheduler, None)
    }

    fn build(
        idle: Duration,
        scheduler: Arc<dyn Scheduler>,
        passthrough: Option<mpsc::Sender<Span>>,
    ) -> Result<Self, WindowError> {
        let inner = GroupingWindow::new("trace-group", WindowConfig::extend(idle), scheduler)?;
        Ok(Self {
            inner,
            passthrough,
            dropped: AtomicU64::new(0),
        })
    }

    /// Forward the span, then add it to its trace's run.
    pub fn admit(&self, span: Span) -> Admission<Span> {
        self.forward(&span);
        let key = span.trace_id.clone();
        let timestamp = span.start_time;
        let admission = self.inner.admit(Event::new(key, timestamp, span));
        if let Admission::Rejected = admission {
            debug!(timestamp, "span arrived too late for its trace group");
        }
        admission
    }

    fn forward(&self, span: &Span) {
        let Some(tx) = &self.passthrough else {
            return;
        };
        match tx.try_send(span.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(trace_id = %span.trace_id, "pass-through channel full, span not forwarded");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Release every trace idle since before `now`.
    pub fn on_timer(&self, now: Timestamp) -> Vec<Batch<Span>> {
        self.inner.on_timer(now)
    }

    pub fn drain(&self) -> Vec<Batch<Span>> {
        self.inner.drain()
    }

    pub fn idle_ms(&self) -> i64 {
        self.inner.config().gap_ms
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.next_deadline()
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            passthrough_dropped: self.dropped.load(Ordering::Relaxed),
            ..self.inner.stats()
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot<Span> {
        self.inner.snapshot()
    }

    pub fn restore(&self, snapshot: WindowSnapshot<Span>) -> Result<usize, WindowError> {
        self.inner.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventTimeScheduler;

    fn span(trace: &str, id: &str, parent: Option<&str>, component: &str, start: Timestamp) -> Span {
        Span::new(trace, id, parent, component, start)
    }

    #[tokio::test]
    async fn test_passthrough_forwards_before_expiry() {
        let scheduler = Arc::new(EventTimeScheduler::new());
        let (window, mut rx) = TraceGroupWindow::new(Duration::from_secs(60), scheduler, 8).unwrap();

        window.admit(span("t1", "a", None, "gateway", 1_000));
        window.admit(span("t1", "b", Some("a"), "employee", 1_010));

        assert_eq!(rx.recv().await.unwrap().span_id, "a");
        assert_eq!(rx.recv().await.unwrap().span_id, "b");
        assert!(window.on_timer(30_000).is_empty());

        let batch = window.on_timer(61_010).pop().unwrap();
        assert_eq!(batch.key, "t1");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_full_passthrough_does_not_block_grouping() {
        let scheduler = Arc::new(EventTimeScheduler::new());
        let (window, _rx) = TraceGroupWindow::new(Duration::from_secs(1), scheduler, 1).unwrap();

        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            window.admit(span("t", id, None, "gw", i as Timestamp));
        }

        let stats = window.stats();
        assert_eq!(stats.passthrough_dropped, 2);
        assert_eq!(stats.admitted, 3);
        assert_eq!(window.drain().pop().unwrap().len(), 3);
    }

    #[test]
    fn test_trace_extends_past_deadline_until_timer_fires() {
        let scheduler = Arc::new(EventTimeScheduler::new());
        let window = TraceGroupWindow::without_passthrough(Duration::from_millis(100), scheduler).unwrap();

        window.admit(span("t", "a", None, "gw", 0));
        assert!(matches!(
            window.admit(span("t", "b", Some("a"), "svc", 180)),
            Admission::Appended
        ));
        assert_eq!(window.next_deadline(), Some(280));
        assert_eq!(window.idle_ms(), 100);
    }

    #[test]
    fn test_dropped_receiver_counts_as_drop() {
        let scheduler = Arc::new(EventTimeScheduler::new());
        let (window, rx) = TraceGroupWindow::new(Duration::from_secs(1), scheduler, 4).unwrap();
        drop(rx);
        window.admit(span("t", "a", None, "gw", 0));
        assert_eq!(window.stats().passthrough_dropped, 1);
        assert_eq!(window.stats().open_runs, 1);
    }
}
