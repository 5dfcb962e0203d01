//! Model - the node and edge set of one runtime, plus the persisted snapshot wrapper.

use std::collections::{BTreeMap, BTreeSet};

use crate::{current_timestamp_ms, Edge, Node, NodeId, SchemaVersion, Timestamp};

/// Nodes and edges of one runtime scope, sorted by identity.
///
/// # Example
///
/// ```rust
/// use meshtopo_types::Model;
///
/// let model = Model::builder("mesh")
///     .node(("default", "hr", "gateway"), |n| n.kind("Cell"))
///     .node(("default", "hr", "employee"), |n| n.service("employee-svc"))
///     .edge(("default", "hr", "gateway"), ("default", "hr", "employee"), "employee-svc")
///     .build();
///
/// assert_eq!(model.nodes.len(), 2);
/// assert!(model.has_edge("default#hr#gateway", "default#hr#employee"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Model {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub runtime: String,

    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(1))]
    pub nodes: Vec<Node>,

    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(2))]
    pub edges: Vec<Edge>,
}

impl Model {
    /// An empty model for `runtime`.
    pub fn empty(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn builder(runtime: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(runtime)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, fqn: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.fqn() == fqn)
    }

    pub fn has_node(&self, fqn: &str) -> bool {
        self.node(fqn).is_some()
    }

    /// Whether any edge links `source` to `destination`, regardless of service.
    pub fn has_edge(&self, source: &str, destination: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source.fqn() == source && e.destination.fqn() == destination)
    }

    pub fn has_service_edge(&self, source: &str, destination: &str, service: &str) -> bool {
        self.edges.iter().any(|e| {
            e.source.fqn() == source && e.destination.fqn() == destination && e.service == service
        })
    }

    /// Fully qualified names of all nodes, sorted.
    pub fn fqns(&self) -> BTreeSet<String> {
        self.nodes.iter().map(Node::fqn).collect()
    }

    /// Sort nodes and edges by identity.
    pub fn normalize(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges.sort_by_key(Edge::key);
    }
}

/// Builder for constructing [`Model`] values, mostly in tests and fixtures.
#[derive(Debug)]
pub struct ModelBuilder {
    runtime: String,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl ModelBuilder {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    fn id(&self, (namespace, instance, component): (&str, &str, &str)) -> NodeId {
        NodeId::new(self.runtime.as_str(), namespace, instance, component)
    }

    /// Add a node configured by a closure.
    pub fn node<F>(mut self, at: (&str, &str, &str), f: F) -> Self
    where
        F: FnOnce(NodeBuilder) -> NodeBuilder,
    {
        let id = self.id(at);
        let node = f(NodeBuilder::new(id.clone())).build();
        self.nodes.insert(id, node);
        self
    }

    /// Add an edge, creating bare endpoint nodes that are not present yet.
    pub fn edge(
        mut self,
        source: (&str, &str, &str),
        destination: (&str, &str, &str),
        service: impl Into<String>,
    ) -> Self {
        let source = self.id(source);
        let destination = self.id(destination);
        for id in [&source, &destination] {
            self.nodes
                .entry(id.clone())
                .or_insert_with(|| Node::new(id.clone()));
        }
        self.edges.push(Edge::new(source, destination, service));
        self
    }

    pub fn build(self) -> Model {
        let mut model = Model {
            runtime: self.runtime,
            nodes: self.nodes.into_values().collect(),
            edges: self.edges,
        };
        model.normalize();
        model.edges.dedup_by(|a, b| a.key() == b.key());
        model
    }
}

/// Builder for a single [`Node`].
#[derive(Debug)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    fn new(id: NodeId) -> Self {
        Self {
            node: Node::new(id),
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.node.instance_kind = Some(kind.into());
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.node.services.insert(service.into());
        self
    }

    pub fn seen(mut self, ts: Timestamp) -> Self {
        self.node.observe(ts);
        self
    }

    fn build(self) -> Node {
        self.node
    }
}

/// Durable form of every runtime's model, written by the model store.
///
/// Snapshots exist for warm restart only. They are never a source of
/// truth for historical queries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct ModelSnapshot {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub version: SchemaVersion,

    /// Wall-clock milliseconds when the snapshot was taken.
    #[cfg_attr(feature = "serde", serde(rename = "takenAt"))]
    #[cfg_attr(feature = "minicbor", n(1))]
    pub taken_at: Timestamp,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub models: BTreeMap<String, Model>,
}

impl ModelSnapshot {
    pub fn new(models: BTreeMap<String, Model>) -> Self {
        Self::with_timestamp(current_timestamp_ms(), models)
    }

    pub fn with_timestamp(taken_at: Timestamp, models: BTreeMap<String, Model>) -> Self {
        Self {
            version: SchemaVersion::current(),
            taken_at,
            models,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.values().all(Model::is_empty)
    }

    pub fn get(&self, runtime: &str) -> Option<&Model> {
        self.models.get(runtime)
    }

    pub fn node_count(&self) -> usize {
        self.models.values().map(|m| m.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.models.values().map(|m| m.edges.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Model {
        Model::builder("mesh")
            .node(("default", "hr", "gateway"), |n| n.kind("Cell").seen(10))
            .edge(
                ("default", "hr", "gateway"),
                ("default", "hr", "employee"),
                "employee",
            )
            .edge(
                ("default", "hr", "gateway"),
                ("default", "hr", "employee"),
                "employee",
            )
            .build()
    }

    #[test]
    fn test_builder_dedups_edges_and_creates_endpoints() {
        let model = sample();
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.edges.len(), 1);
        assert_eq!(
            model.node("default#hr#gateway").unwrap().instance_kind.as_deref(),
            Some("Cell")
        );
        assert!(model.has_service_edge("default#hr#gateway", "default#hr#employee", "employee"));
    }

    #[test]
    fn test_snapshot_counts() {
        let mut models = BTreeMap::new();
        models.insert("mesh".to_string(), sample());
        models.insert("other".to_string(), Model::empty("other"));
        let snapshot = ModelSnapshot::with_timestamp(1_700_000_000_000, models);
        assert!(snapshot.version.is_compatible());
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.edge_count(), 1);
        assert!(!snapshot.is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip() {
        let mut models = BTreeMap::new();
        models.insert("mesh".to_string(), sample());
        let snapshot = ModelSnapshot::with_timestamp(1_700_000_000_000, models);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ModelSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(snapshot, parsed);
    }

    #[cfg(feature = "minicbor")]
    #[test]
    fn test_minicbor_roundtrip() {
        let mut models = BTreeMap::new();
        models.insert("mesh".to_string(), sample());
        let snapshot = ModelSnapshot::with_timestamp(1_700_000_000_000, models);

        let bytes = minicbor::to_vec(&snapshot).unwrap();
        let parsed: ModelSnapshot = minicbor::decode(&bytes).unwrap();

        assert_eq!(snapshot, parsed);
    }
}
