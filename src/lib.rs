//! # meshtopo
//!
//! Builds a live dependency graph of a service mesh from distributed-tracing
//! spans and cluster lifecycle events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            meshtopo                              │
//! │  ┌──────────┐    ┌────────────────────┐    ┌──────────────────┐  │
//! │  │  source  │───▶│      pipeline      │───▶│  ModelManager    │  │
//! │  │ (NDJSON) │    │ windows + builder  │    │  + ModelStore    │  │
//! │  └──────────┘    └────────────────────┘    └──────────────────┘  │
//! │                           ▲                                      │
//! │                           │ Settings (config file + env)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: [`EventSource`] trait with file, TCP stream and
//!   channel implementations
//! - **[`pipeline`]**: trace-group and session windows driven by event time,
//!   topology building, control events and snapshot persistence
//! - **[`config`]**: layered [`Settings`]
//!
//! ## Usage
//!
//! ```bash
//! # Replay a file, then write the resulting model
//! meshtopo --input events.jsonl --export model.json
//!
//! # Follow a live NDJSON feed
//! meshtopo --connect localhost:9411 --config meshtopo.toml
//! ```
//!
//! ### As a library
//!
//! ```
//! use std::sync::Arc;
//! use meshtopo::{Pipeline, Settings};
//! use meshtopo_model::MemoryStore;
//! use meshtopo_types::{Span, TimeRange};
//! use meshtopo_window::ManualClock;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let pipeline = Pipeline::new(&Settings::default(), Arc::new(MemoryStore::new()), clock.clone()).unwrap();
//!
//! pipeline.ingest(Span::new("t1", "a", None, "gateway", 0).located("mesh", "default", "hr").into());
//! pipeline.ingest(
//!     Span::new("t1", "b", Some("a"), "employee", 3)
//!         .service("employee")
//!         .located("mesh", "default", "hr")
//!         .into(),
//! );
//!
//! clock.set(120_000);
//! pipeline.tick();
//!
//! let model = pipeline.manager().get_instance_dependency_model(TimeRange::ALL, "mesh", "default", "hr");
//! assert!(model.has_edge("default#hr#gateway", "default#hr#employee"));
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod source;

pub use config::Settings;
pub use error::{PipelineError, SettingsError};
pub use pipeline::{ActivitySession, Pipeline, PipelineStats, Tick, TickerHandle};
pub use source::{ChannelSource, EventSource, FileSource, StreamSource};
