//! # meshtopo-model
//!
//! The live dependency graph of a service mesh.
//!
//! - [`ModelManager`] owns the graph: get-or-create nodes, add edges,
//!   remove nodes, and answer scoped point-in-time queries.
//! - [`TopologyBuilder`] turns an expired trace group into graph mutations.
//! - [`ControlHandler`] applies lifecycle events from the cluster watcher.
//! - [`ModelStore`] persists snapshots and restores them after a restart.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use meshtopo_model::{MemoryStore, ModelManager, ModelStore, SnapshotCodec, TopologyBuilder};
//! use meshtopo_types::{Span, TimeRange};
//!
//! let manager = Arc::new(ModelManager::new());
//! let store = ModelStore::new(manager.clone(), Arc::new(MemoryStore::new()), SnapshotCodec::Json);
//! store.load_model();
//!
//! let trace = vec![
//!     Span::new("t1", "a", None, "gateway", 0).located("mesh", "default", "hr"),
//!     Span::new("t1", "b", Some("a"), "employee", 5)
//!         .service("employee")
//!         .located("mesh", "default", "hr"),
//! ];
//! TopologyBuilder::default().build(&trace, &manager).unwrap();
//! store.store_current_model();
//!
//! let model = manager.get_namespace_dependency_model(TimeRange::ALL, "mesh", "default");
//! assert!(model.has_service_edge("default#hr#gateway", "default#hr#employee", "employee"));
//! ```

mod error;
mod handler;
mod manager;
mod store;
mod topology;

pub use error::{ModelError, StoreError};
pub use handler::ControlHandler;
pub use manager::{ApplyOutcome, ModelManager, NodeAttributes, NodeState};
pub use store::{FileStore, MemoryStore, ModelStore, SnapshotCodec, SnapshotPolicy, SnapshotStore};
pub use topology::{Mutation, TopologyBuilder, TopologyConfig};

#[cfg(feature = "tokio")]
pub use store::PersistHandle;

// Re-export types for convenience
pub use meshtopo_types::{Edge, Model, ModelSnapshot, Node, NodeId, TimeRange};
