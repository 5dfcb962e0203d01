//! Keyed grouping window shared by the session and trace-group windows.
//!
//! A window keeps at most one open run per key. Each run has a `start` (the
//! earliest admitted timestamp) and a `deadline` (the latest admitted
//! timestamp plus the idle gap). A deadline-ordered index lets
//! [`GroupingWindow::on_timer`] stop at the first run that is not due yet.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshtopo_types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Scheduler, WindowError};

/// A payload admitted under a grouping key at an event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<P> {
    pub key: String,
    pub timestamp: Timestamp,
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(key: impl Into<String>, timestamp: Timestamp, payload: P) -> Self {
        Self {
            key: key.into(),
            timestamp,
            payload,
        }
    }
}

/// An expired run handed to the consumer. Never empty.
///
/// Events keep their arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<P> {
    pub key: String,
    pub start: Timestamp,
    pub deadline: Timestamp,
    pub events: Vec<Event<P>>,
}

impl<P> Batch<P> {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.events.iter().map(|e| e.timestamp).collect()
    }

    pub fn into_payloads(self) -> Vec<P> {
        self.events.into_iter().map(|e| e.payload).collect()
    }
}

/// What happens to an event that arrives after its run's deadline but
/// before the timer for that deadline has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// The overdue run is closed and the event starts a new run.
    Session,
    /// The event joins the run and pushes its deadline out.
    Extend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub gap_ms: i64,
    pub boundary: Boundary,
}

impl WindowConfig {
    pub fn session(gap: Duration) -> Self {
        Self {
            gap_ms: duration_ms(gap),
            boundary: Boundary::Session,
        }
    }

    pub fn extend(gap: Duration) -> Self {
        Self {
            gap_ms: duration_ms(gap),
            boundary: Boundary::Extend,
        }
    }

    pub fn validate(&self) -> Result<(), WindowError> {
        if self.gap_ms <= 0 {
            return Err(WindowError::InvalidGap(self.gap_ms));
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Outcome of [`GroupingWindow::admit`].
#[derive(Debug)]
pub enum Admission<P> {
    /// First event for the key; a new run was opened.
    Opened,
    /// Appended to the open run.
    Appended,
    /// Older than the run's start but within the gap; the start moved back.
    Late,
    /// Older than `start - gap`; dropped.
    Rejected,
    /// The key's overdue run was closed and returned; the event opened a new run.
    Rolled(Batch<P>),
}

impl<P> Admission<P> {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub admitted: u64,
    pub late_admitted: u64,
    pub rejected: u64,
    pub batches_emitted: u64,
    pub events_emitted: u64,
    pub open_runs: usize,
    pub passthrough_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    late_admitted: AtomicU64,
    rejected: AtomicU64,
    batches_emitted: AtomicU64,
    events_emitted: AtomicU64,
}

impl Counters {
    fn emitted<P>(&self, batch: &Batch<P>) {
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
        self.events_emitted
            .fetch_add(batch.events.len() as u64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Run<P> {
    start: Timestamp,
    deadline: Timestamp,
    events: Vec<Event<P>>,
}

impl<P> Run<P> {
    fn into_batch(self, key: String) -> Batch<P> {
        Batch {
            key,
            start: self.start,
            deadline: self.deadline,
            events: self.events,
        }
    }
}

#[derive(Debug)]
struct State<P> {
    runs: HashMap<String, Run<P>>,
    deadlines: BTreeSet<(Timestamp, String)>,
}

impl<P> State<P> {
    fn new() -> Self {
        Self {
            runs: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    fn open(&mut self, event: Event<P>, gap: i64) -> Timestamp {
        let deadline = event.timestamp.saturating_add(gap);
        let key = event.key.clone();
        self.deadlines.insert((deadline, key.clone()));
        self.runs.insert(
            key,
            Run {
                start: event.timestamp,
                deadline,
                events: vec![event],
            },
        );
        deadline
    }

    fn detach(&mut self, key: &str) -> Option<Batch<P>> {
        let run = self.runs.remove(key)?;
        self.deadlines.remove(&(run.deadline, key.to_string()));
        Some(run.into_batch(key.to_string()))
    }
}

/// A keyed event-time window with idle-gap expiry.
///
/// All mutation happens under one lock per window, held for the whole of
/// each admission or expiry pass.
pub struct GroupingWindow<P> {
    name: String,
    config: WindowConfig,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<State<P>>,
    counters: Counters,
}

impl<P> GroupingWindow<P> {
    pub fn new(
        name: impl Into<String>,
        config: WindowConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, WindowError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            scheduler,
            state: Mutex::new(State::new()),
            counters: Counters::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    /// Route an event to its key's run, opening one if needed.
    pub fn admit(&self, event: Event<P>) -> Admission<P> {
        let gap = self.config.gap_ms;
        let ts = event.timestamp;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (start, deadline) = match state.runs.get(&event.key) {
            Some(run) => (run.start, run.deadline),
            None => {
                let deadline = state.open(event, gap);
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.scheduler.notify_at(deadline);
                return Admission::Opened;
            }
        };

        if ts < start.saturating_sub(gap) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                window = %self.name,
                key = %event.key,
                timestamp = ts,
                start,
                "dropping event older than its run allows"
            );
            return Admission::Rejected;
        }

        if self.config.boundary == Boundary::Session && ts > deadline {
            let Some(closed) = state.detach(&event.key) else {
                return Admission::Rejected;
            };
            self.counters.emitted(&closed);
            let next = state.open(event, gap);
            self.counters.admitted.fetch_add(1, Ordering::Relaxed);
            self.scheduler.notify_at(next);
            info!(window = %self.name, key = %closed.key, events = closed.len(), "overdue run closed on admission");
            return Admission::Rolled(closed);
        }

        let late = ts < start;
        let next_deadline = deadline.max(ts.saturating_add(gap));
        let key = event.key.clone();
        if let Some(run) = state.runs.get_mut(&key) {
            if late {
                run.start = ts;
            }
            run.deadline = next_deadline;
            run.events.push(event);
        }
        if next_deadline != deadline {
            state.deadlines.remove(&(deadline, key.clone()));
            state.deadlines.insert((next_deadline, key));
            self.scheduler.notify_at(next_deadline);
        }

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        if late {
            self.counters.late_admitted.fetch_add(1, Ordering::Relaxed);
            debug!(window = %self.name, timestamp = ts, start, "late event admitted");
            Admission::Late
        } else {
            Admission::Appended
        }
    }

    /// Emit every run whose deadline is at or before `now`, earliest first.
    pub fn on_timer(&self, now: Timestamp) -> Vec<Batch<P>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut batches = Vec::new();

        while let Some((deadline, _)) = state.deadlines.first() {
            if *deadline > now {
                break;
            }
            let Some((_, key)) = state.deadlines.pop_first() else {
                break;
            };
            if let Some(run) = state.runs.remove(&key) {
                let batch = run.into_batch(key);
                self.counters.emitted(&batch);
                batches.push(batch);
            }
        }

        if !batches.is_empty() {
            info!(window = %self.name, now, batches = batches.len(), "runs expired");
        }
        batches
    }

    /// Expire every open run regardless of its deadline.
    pub fn drain(&self) -> Vec<Batch<P>> {
        self.on_timer(Timestamp::MAX)
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.state.lock().deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn open_runs(&self) -> usize {
        self.state.lock().runs.len()
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            late_admitted: self.counters.late_admitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            batches_emitted: self.counters.batches_emitted.load(Ordering::Relaxed),
            events_emitted: self.counters.events_emitted.load(Ordering::Relaxed),
            open_runs: self.open_runs(),
            passthrough_dropped: 0,
        }
    }

    /// Capture every open run and its deadline.
    pub fn snapshot(&self) -> WindowSnapshot<P>
    where
        P: Clone,
    {
        let state = self.state.lock();
        let runs = state
            .deadlines
            .iter()
            .filter_map(|(_, key)| {
                state.runs.get(key).map(|run| RunSnapshot {
                    key: key.clone(),
                    start: run.start,
                    deadline: run.deadline,
                    events: run.events.clone(),
                })
            })
            .collect();
        WindowSnapshot {
            gap_ms: self.config.gap_ms,
            runs,
        }
    }

    /// Replace all open runs with the contents of `snapshot`.
    ///
    /// Every restored deadline is requested from the scheduler again.
    /// Returns the number of runs restored.
    pub fn restore(&self, snapshot: WindowSnapshot<P>) -> Result<usize, WindowError> {
        let mut seen = BTreeSet::new();
        for run in &snapshot.runs {
            if run.events.is_empty() {
                return Err(WindowError::EmptyRun(run.key.clone()));
            }
            if !seen.insert(run.key.as_str()) {
                return Err(WindowError::DuplicateKey(run.key.clone()));
            }
        }
        if snapshot.gap_ms != self.config.gap_ms {
            warn!(
                window = %self.name,
                snapshot_gap_ms = snapshot.gap_ms,
                gap_ms = self.config.gap_ms,
                "restoring runs captured with a different gap"
            );
        }

        let mut state = self.state.lock();
        *state = State::new();
        for run in snapshot.runs {
            state.deadlines.insert((run.deadline, run.key.clone()));
            self.scheduler.notify_at(run.deadline);
            state.runs.insert(
                run.key,
                Run {
                    start: run.start,
                    deadline: run.deadline,
                    events: run.events,
                },
            );
        }
        let restored = state.runs.len();
        debug!(window = %self.name, runs = restored, "window restored");
        Ok(restored)
    }
}

impl<P> fmt::Debug for GroupingWindow<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupingWindow")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("open_runs", &self.open_runs())
            .finish()
    }
}

/// Serializable state of a window: its open runs and their deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot<P> {
    pub gap_ms: i64,
    pub runs: Vec<RunSnapshot<P>>,
}

impl<P> WindowSnapshot<P> {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot<P> {
    pub key: String,
    pub start: Timestamp,
    pub deadline: Timestamp,
    pub events: Vec<Event<P>>,
}
