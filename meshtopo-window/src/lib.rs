//! # meshtopo-window
//!
//! Event-time grouping windows. A window buffers an unbounded, possibly
//! out-of-order stream of timestamped events, groups them by key, and
//! releases each group exactly once after it has been idle for a gap.
//!
//! The windows do not own a timer. They ask a [`Scheduler`] to be woken at
//! a deadline, and the host calls `on_timer(now)` once event time has
//! reached it. [`EventTimeScheduler`] is the in-process implementation.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use meshtopo_types::Span;
//! use meshtopo_window::{EventTimeScheduler, TraceGroupWindow};
//!
//! let scheduler = Arc::new(EventTimeScheduler::new());
//! let window = TraceGroupWindow::without_passthrough(Duration::from_secs(60), scheduler.clone()).unwrap();
//!
//! window.admit(Span::new("trace-1", "a", None, "gateway", 0));
//! window.admit(Span::new("trace-1", "b", Some("a"), "employee", 20));
//!
//! if scheduler.due(60_020) {
//!     for batch in window.on_timer(60_020) {
//!         assert_eq!(batch.len(), 2);
//!     }
//! }
//! ```

mod engine;
mod error;
mod scheduler;
mod session;
mod trace_group;

pub use engine::{
    Admission, Batch, Boundary, Event, GroupingWindow, RunSnapshot, WindowConfig, WindowSnapshot,
    WindowStats,
};
pub use error::WindowError;
pub use scheduler::{Clock, EventTimeScheduler, ManualClock, Scheduler, SystemClock, Watermark};
pub use session::SessionWindow;
pub use trace_group::TraceGroupWindow;
