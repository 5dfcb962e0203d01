//! Wires the windows, the topology builder and the model together.
//!
//! ```text
//!  InputEvent ─┬─ Span ──▶ TraceGroupWindow ──(idle)──▶ TopologyBuilder ──▶ ModelManager ──▶ ModelStore
//!              │                 │
//!              │                 └─ pass-through ──▶ SessionWindow (component activity)
//!              │
//!              └─ Control ──────────────────────────▶ ControlHandler ──▶ ModelManager
//! ```
//!
//! Event time is the later of the highest span timestamp seen and the
//! pipeline's clock, so idle traces still expire when input stops.
//!
//! Traces still waiting in the window are saved next to the model snapshot
//! and reopened on restart, so a crash does not lose half-collected traces.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshtopo_model::{
    ControlHandler, ModelManager, ModelStore, PersistHandle, SnapshotPolicy, SnapshotStore,
    TopologyBuilder,
};
use meshtopo_types::{ControlEvent, InputEvent, ModelSnapshot, NodeId, Span, Timestamp};
use meshtopo_window::{
    Admission, Batch, Clock, EventTimeScheduler, SessionWindow, TraceGroupWindow, Watermark,
    WindowSnapshot, WindowStats,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::PipelineError;

/// A closed burst of activity on one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySession {
    /// `runtime#namespace#instance#component`.
    pub node: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub spans: usize,
    /// Sum of span durations.
    pub busy_ms: i64,
}

impl From<Batch<i64>> for ActivitySession {
    fn from(batch: Batch<i64>) -> Self {
        let end = batch
            .events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(batch.start);
        let spans = batch.len();
        let busy_ms = batch.events.iter().map(|e| e.payload).sum();
        Self {
            node: batch.key,
            start: batch.start,
            end,
            spans,
            busy_ms,
        }
    }
}

/// What one call to [`Pipeline::tick`] released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tick {
    pub now: Timestamp,
    pub traces_applied: usize,
    pub sessions: Vec<ActivitySession>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub spans: u64,
    pub control_events: u64,
    pub control_rejected: u64,
    pub traces_applied: u64,
    pub traces_failed: u64,
    pub sessions_closed: u64,
    pub trace_window: WindowStats,
    pub session_window: WindowStats,
    pub snapshots_saved: u64,
    pub snapshot_failures: u64,
    pub window_snapshots_saved: u64,
}

#[derive(Debug, Default)]
struct Counters {
    spans: AtomicU64,
    control_events: AtomicU64,
    control_rejected: AtomicU64,
    traces_applied: AtomicU64,
    traces_failed: AtomicU64,
    sessions_closed: AtomicU64,
    window_saves: AtomicU64,
}

/// The running core: windows, builder, model and store.
#[derive(Debug)]
pub struct Pipeline {
    clock: Arc<dyn Clock>,
    scheduler: Arc<EventTimeScheduler>,
    watermark: Watermark,
    traces: TraceGroupWindow,
    passthrough: Mutex<mpsc::Receiver<Span>>,
    sessions: SessionWindow<i64>,
    builder: TopologyBuilder,
    manager: Arc<ModelManager>,
    control: ControlHandler,
    store: Arc<ModelStore>,
    backend: Arc<dyn SnapshotStore>,
    /// Bumped whenever the set of open traces changes.
    window_version: AtomicU64,
    window_persisted: Mutex<u64>,
    policy: SnapshotPolicy,
    persist: Mutex<Option<PersistHandle>>,
    closed: AtomicBool,
    counters: Counters,
}

impl Pipeline {
    /// Build the pipeline and restore the latest snapshot and the open
    /// traces from `backend`.
    ///
    /// The periodic snapshot policy spawns a task, so it must be called
    /// from within a tokio runtime.
    pub fn new(
        settings: &Settings,
        backend: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;

        let scheduler = Arc::new(EventTimeScheduler::new());
        let (traces, passthrough) = TraceGroupWindow::new(
            settings.trace_idle_timeout(),
            scheduler.clone(),
            settings.window.passthrough_buffer,
        )?;
        let sessions = SessionWindow::new(settings.session_gap(), scheduler.clone())?;

        let manager = Arc::new(ModelManager::new());
        let store = Arc::new(ModelStore::new(
            manager.clone(),
            backend.clone(),
            settings.store.codec,
        ));
        store.load_model();

        let watermark = Watermark::new();
        restore_window(&traces, backend.as_ref(), &watermark);

        let policy = settings.snapshot_policy();
        let persist = match policy {
            SnapshotPolicy::Inline => None,
            SnapshotPolicy::Periodic { interval } => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(PipelineError::NoRuntime);
                }
                Some(store.start(interval))
            }
        };

        Ok(Self {
            clock,
            scheduler,
            watermark,
            traces,
            passthrough: Mutex::new(passthrough),
            sessions,
            builder: TopologyBuilder::new(settings.topology_config()),
            control: ControlHandler::new(manager.clone()),
            manager,
            store,
            backend,
            window_version: AtomicU64::new(0),
            window_persisted: Mutex::new(0),
            policy,
            persist: Mutex::new(persist),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Current event time.
    pub fn event_time(&self) -> Timestamp {
        self.watermark.current()
    }

    /// Feed one input event. Returns false if it was dropped.
    pub fn ingest(&self, event: InputEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!("pipeline is shut down, dropping event");
            return false;
        }
        match event {
            InputEvent::Span(span) => self.ingest_span(span),
            InputEvent::Control(event) => self.ingest_control(&event),
        }
    }

    fn ingest_span(&self, span: Span) -> bool {
        self.counters.spans.fetch_add(1, Ordering::Relaxed);
        let now = self.watermark.observe(span.start_time);

        let admitted = match self.traces.admit(span) {
            Admission::Rejected => false,
            Admission::Rolled(batch) => {
                self.window_changed();
                self.commit(vec![batch]);
                true
            }
            _ => {
                self.window_changed();
                true
            }
        };

        self.pump_passthrough();
        self.advance(now);
        if self.policy == SnapshotPolicy::Inline {
            self.persist_window();
        }
        admitted
    }

    fn ingest_control(&self, event: &ControlEvent) -> bool {
        self.counters.control_events.fetch_add(1, Ordering::Relaxed);
        if self.control.handle(event) {
            self.persist_inline();
            true
        } else {
            self.counters.control_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Advance event time to the clock and release whatever went idle.
    pub fn tick(&self) -> Tick {
        let now = self.watermark.observe(self.clock.now());
        let mut sessions = self.pump_passthrough();
        let mut tick = self.advance(now);
        sessions.append(&mut tick.sessions);
        tick.sessions = sessions;
        self.persist_window();
        tick
    }

    fn advance(&self, now: Timestamp) -> Tick {
        let mut tick = Tick {
            now,
            ..Tick::default()
        };
        if !self.scheduler.due(now) {
            return tick;
        }
        tick.traces_applied = self.expire(self.traces.on_timer(now));
        tick.sessions = self.close_sessions(self.sessions.on_timer(now));
        tick
    }

    /// Move forwarded spans into the activity sessions.
    fn pump_passthrough(&self) -> Vec<ActivitySession> {
        let mut rolled = Vec::new();
        let mut rx = self.passthrough.lock();
        while let Ok(span) = rx.try_recv() {
            let Some(id) = self.builder.node_id(&span) else {
                continue;
            };
            if let Admission::Rolled(batch) =
                self.sessions
                    .admit(session_key(&id), span.start_time, span.duration)
            {
                rolled.push(batch);
            }
        }
        drop(rx);
        self.close_sessions(rolled)
    }

    fn close_sessions(&self, batches: Vec<Batch<i64>>) -> Vec<ActivitySession> {
        batches
            .into_iter()
            .map(|batch| {
                let session = ActivitySession::from(batch);
                self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    node = %session.node,
                    spans = session.spans,
                    busy_ms = session.busy_ms,
                    "activity session closed"
                );
                session
            })
            .collect()
    }

    fn window_changed(&self) {
        self.window_version.fetch_add(1, Ordering::AcqRel);
    }

    fn expire(&self, batches: Vec<Batch<Span>>) -> usize {
        if !batches.is_empty() {
            self.window_changed();
        }
        self.commit(batches)
    }

    /// Build and apply each expired trace. A failed trace never affects the others.
    fn commit(&self, batches: Vec<Batch<Span>>) -> usize {
        let mut applied = 0;
        for batch in batches {
            let trace_id = batch.key.clone();
            let spans = batch.into_payloads();
            match self.builder.build(&spans, &self.manager) {
                Ok(outcome) => {
                    applied += 1;
                    self.counters.traces_applied.fetch_add(1, Ordering::Relaxed);
                    info!(
                        trace_id = %trace_id,
                        spans = spans.len(),
                        nodes = outcome.nodes_touched,
                        edges = outcome.edges_added,
                        "trace group applied"
                    );
                    self.persist_inline();
                }
                Err(e) => {
                    self.counters.traces_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(trace_id = %trace_id, error = %e, "trace group rejected");
                }
            }
        }
        applied
    }

    fn persist_inline(&self) {
        if self.policy == SnapshotPolicy::Inline {
            self.store.store_current_model();
            self.persist_window();
        }
    }

    /// Save the open traces if they changed since the last save.
    fn persist_window(&self) -> bool {
        let mut persisted = self.window_persisted.lock();
        let version = self.window_version.load(Ordering::Acquire);
        if *persisted == version {
            return true;
        }

        let snapshot = self.traces.snapshot();
        let saved = serde_json::to_vec(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.backend.save_window(&bytes).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => {
                *persisted = version;
                self.counters.window_saves.fetch_add(1, Ordering::Relaxed);
                debug!(
                    store = self.backend.description(),
                    runs = snapshot.runs.len(),
                    "trace window saved"
                );
                true
            }
            Err(e) => {
                warn!(store = self.backend.description(), error = %e, "failed to save trace window");
                false
            }
        }
    }

    /// Stop accepting events, release every open run and write a final snapshot.
    pub async fn shutdown(&self) -> PipelineStats {
        if self.closed.swap(true, Ordering::AcqRel) {
            return self.stats();
        }

        let mut sessions = self.pump_passthrough();
        let applied = self.expire(self.traces.drain());
        sessions.extend(self.close_sessions(self.sessions.drain()));
        self.persist_window();

        let handle = self.persist.lock().take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => {
                self.store.store_current_model();
            }
        }

        info!(
            traces = applied,
            sessions = sessions.len(),
            "pipeline drained"
        );
        self.stats()
    }

    /// Explicit persistence barrier for the model and the open traces.
    pub async fn flush(&self) -> bool {
        let window_saved = self.persist_window();
        let handle = self.persist.lock().take();
        let model_saved = match handle {
            Some(handle) => {
                let ok = handle.flush().await;
                *self.persist.lock() = Some(handle);
                ok
            }
            None => self.store.try_store_current_model().is_ok(),
        };
        window_saved && model_saved
    }

    /// The whole model, as persisted.
    pub fn export(&self) -> ModelSnapshot {
        self.manager.snapshot()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            spans: self.counters.spans.load(Ordering::Relaxed),
            control_events: self.counters.control_events.load(Ordering::Relaxed),
            control_rejected: self.counters.control_rejected.load(Ordering::Relaxed),
            traces_applied: self.counters.traces_applied.load(Ordering::Relaxed),
            traces_failed: self.counters.traces_failed.load(Ordering::Relaxed),
            sessions_closed: self.counters.sessions_closed.load(Ordering::Relaxed),
            trace_window: self.traces.stats(),
            session_window: self.sessions.stats(),
            snapshots_saved: self.store.saves(),
            snapshot_failures: self.store.failures(),
            window_snapshots_saved: self.counters.window_saves.load(Ordering::Relaxed),
        }
    }

    /// Tick on a wall-clock interval until the handle is stopped.
    pub fn start_ticker(self: &Arc<Self>, interval: Duration) -> TickerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pipeline = self.clone();

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let tick = pipeline.tick();
                        if tick.traces_applied > 0 || !tick.sessions.is_empty() {
                            debug!(
                                now = tick.now,
                                traces = tick.traces_applied,
                                sessions = tick.sessions.len(),
                                "ticker released runs"
                            );
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        TickerHandle { stop_tx, task }
    }
}

/// Handle for the wall-clock ticker task.
#[derive(Debug)]
pub struct TickerHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TickerHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "ticker task ended abnormally");
        }
    }
}

/// Reopen the traces that were still open when the window was last saved.
///
/// Event time moves up to the newest restored span so the reopened traces
/// expire on schedule. Anything unreadable is logged and skipped.
fn restore_window(traces: &TraceGroupWindow, backend: &dyn SnapshotStore, watermark: &Watermark) {
    let bytes = match backend.load_window() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return,
        Err(e) => {
            warn!(store = backend.description(), error = %e, "could not read trace window");
            return;
        }
    };
    let snapshot: WindowSnapshot<Span> = match serde_json::from_slice(&bytes) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(store = backend.description(), error = %e, "could not decode trace window");
            return;
        }
    };
    let newest = snapshot
        .runs
        .iter()
        .flat_map(|run| run.events.iter().map(|event| event.timestamp))
        .max();
    match traces.restore(snapshot) {
        Ok(runs) => {
            if let Some(ts) = newest {
                watermark.observe(ts);
            }
            if runs > 0 {
                info!(store = backend.description(), runs, "open traces restored");
            }
        }
        Err(e) => warn!(store = backend.description(), error = %e, "could not restore trace window"),
    }
}

fn session_key(id: &NodeId) -> String {
    format!("{}#{}", id.runtime, id.fqn())
}
