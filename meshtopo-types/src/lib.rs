//! # meshtopo-types
//!
//! Core types for mesh dependency graphs. This crate defines the values
//! that flow between the grouping windows, the model manager and the
//! model store, and the schema of persisted snapshots.
//!
//! ## Features
//!
//! - `serde`: JSON (and any other serde format) for events, models and snapshots
//! - `minicbor`: compact binary encoding of models and snapshots
//! - `all`: both of the above
//!
//! ## Example
//!
//! ```rust
//! use meshtopo_types::{Model, NodeId};
//!
//! let model = Model::builder("mesh")
//!     .edge(("default", "hr", "gateway"), ("default", "hr", "employee"), "employee")
//!     .build();
//!
//! let gateway = NodeId::new("mesh", "default", "hr", "gateway");
//! assert!(model.has_node(&gateway.fqn()));
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**. It is written into every
//! [`ModelSnapshot`] and checked on restore.

mod edge;
mod event;
mod model;
mod node;
mod span;
mod time;
mod version;

pub use edge::*;
pub use event::*;
pub use model::*;
pub use node::*;
pub use span::*;
pub use time::*;
pub use version::*;

/// Major layout of persisted snapshots.
pub const SCHEMA_VERSION: u32 = 1;
