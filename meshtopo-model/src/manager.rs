//! In-memory dependency graph, one independently locked scope per runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use meshtopo_types::{Edge, EdgeKey, Model, ModelSnapshot, Node, NodeId, TimeRange, Timestamp};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::topology::Mutation;
use crate::ModelError;

/// First and last observation time, updated without the graph lock.
#[derive(Debug)]
struct Observed {
    first: AtomicI64,
    last: AtomicI64,
}

impl Observed {
    const UNSET_FIRST: i64 = i64::MAX;
    const UNSET_LAST: i64 = i64::MIN;

    fn new() -> Self {
        Self::from_bounds(None, None)
    }

    fn at(ts: Option<Timestamp>) -> Self {
        Self::from_bounds(ts, ts)
    }

    fn from_bounds(first: Option<Timestamp>, last: Option<Timestamp>) -> Self {
        Self {
            first: AtomicI64::new(first.unwrap_or(Self::UNSET_FIRST)),
            last: AtomicI64::new(last.unwrap_or(Self::UNSET_LAST)),
        }
    }

    fn observe(&self, ts: Timestamp) {
        self.first.fetch_min(ts, Ordering::Relaxed);
        self.last.fetch_max(ts, Ordering::Relaxed);
    }

    fn first(&self) -> Option<Timestamp> {
        let first = self.first.load(Ordering::Relaxed);
        (first != Self::UNSET_FIRST).then_some(first)
    }

    fn last(&self) -> Option<Timestamp> {
        let last = self.last.load(Ordering::Relaxed);
        (last != Self::UNSET_LAST).then_some(last)
    }

    fn visible(&self, range: TimeRange) -> bool {
        range.is_unbounded() || range.overlaps(self.first(), self.last())
    }
}

/// A live node. Handed out as `Arc<NodeState>` by get-or-create.
///
/// Attribute changes bump the owning manager's generation so the model
/// store knows the graph has something new to persist.
#[derive(Debug)]
pub struct NodeState {
    id: NodeId,
    instance_kind: RwLock<Option<String>>,
    services: RwLock<BTreeSet<String>>,
    observed: Observed,
    generation: Arc<AtomicU64>,
}

impl NodeState {
    fn new(id: NodeId, generation: Arc<AtomicU64>) -> Self {
        Self {
            id,
            instance_kind: RwLock::new(None),
            services: RwLock::new(BTreeSet::new()),
            observed: Observed::new(),
            generation,
        }
    }

    fn from_node(node: Node, generation: Arc<AtomicU64>) -> Self {
        Self {
            id: node.id,
            instance_kind: RwLock::new(node.instance_kind),
            services: RwLock::new(node.services),
            observed: Observed::from_bounds(node.first_seen, node.last_seen),
            generation,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn fqn(&self) -> String {
        self.id.fqn()
    }

    pub fn instance_kind(&self) -> Option<String> {
        self.instance_kind.read().clone()
    }

    /// Returns true if the kind changed.
    pub fn set_instance_kind(&self, kind: &str) -> bool {
        let mut current = self.instance_kind.write();
        if current.as_deref() == Some(kind) {
            return false;
        }
        *current = Some(kind.to_string());
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn services(&self) -> BTreeSet<String> {
        self.services.read().clone()
    }

    /// Returns true if the service was not recorded yet.
    pub fn add_service(&self, service: &str) -> bool {
        if self.services.read().contains(service) {
            return false;
        }
        let added = self.services.write().insert(service.to_string());
        if added {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        added
    }

    pub fn observe(&self, ts: Timestamp) {
        self.observed.observe(ts);
    }

    pub fn first_seen(&self) -> Option<Timestamp> {
        self.observed.first()
    }

    pub fn last_seen(&self) -> Option<Timestamp> {
        self.observed.last()
    }

    pub fn to_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            instance_kind: self.instance_kind(),
            services: self.services(),
            first_seen: self.first_seen(),
            last_seen: self.last_seen(),
        }
    }
}

/// Attributes recorded on a node in the same critical section that
/// registers it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAttributes<'a> {
    pub instance_kind: Option<&'a str>,
    pub service: Option<&'a str>,
    pub observed_at: Option<Timestamp>,
}

impl<'a> NodeAttributes<'a> {
    pub fn kind(instance_kind: &'a str) -> Self {
        Self {
            instance_kind: Some(instance_kind),
            ..Self::default()
        }
    }

    fn record(&self, node: &NodeState) {
        if let Some(kind) = self.instance_kind {
            node.set_instance_kind(kind);
        }
        if let Some(service) = self.service {
            node.add_service(service);
        }
        if let Some(ts) = self.observed_at {
            node.observe(ts);
        }
    }
}

#[derive(Debug, Default)]
struct Graph {
    nodes: BTreeMap<NodeId, Arc<NodeState>>,
    edges: BTreeMap<EdgeKey, Observed>,
    outgoing: BTreeMap<NodeId, BTreeSet<EdgeKey>>,
    incoming: BTreeMap<NodeId, BTreeSet<EdgeKey>>,
}

impl Graph {
    fn ensure_node(&mut self, id: &NodeId, generation: &Arc<AtomicU64>) -> (Arc<NodeState>, bool) {
        if let Some(node) = self.nodes.get(id) {
            return (node.clone(), false);
        }
        let node = Arc::new(NodeState::new(id.clone(), generation.clone()));
        self.nodes.insert(id.clone(), node.clone());
        generation.fetch_add(1, Ordering::SeqCst);
        (node, true)
    }

    fn insert_edge(&mut self, key: EdgeKey, observed: Observed) -> bool {
        if self.edges.contains_key(&key) {
            return false;
        }
        self.outgoing
            .entry(key.source.clone())
            .or_default()
            .insert(key.clone());
        self.incoming
            .entry(key.destination.clone())
            .or_default()
            .insert(key.clone());
        self.edges.insert(key, observed);
        true
    }

    /// Remove a node and every edge touching it. Returns the number of edges removed.
    fn remove_node(&mut self, id: &NodeId) -> Option<usize> {
        self.nodes.remove(id)?;
        let mut touching: BTreeSet<EdgeKey> = self.outgoing.remove(id).unwrap_or_default();
        touching.extend(self.incoming.remove(id).unwrap_or_default());

        for key in &touching {
            self.edges.remove(key);
            if let Some(out) = self.outgoing.get_mut(&key.source) {
                out.remove(key);
            }
            if let Some(inc) = self.incoming.get_mut(&key.destination) {
                inc.remove(key);
            }
        }
        Some(touching.len())
    }

    fn edge(&self, key: &EdgeKey) -> Edge {
        let mut edge = Edge::from(key.clone());
        if let Some(observed) = self.edges.get(key) {
            edge.first_seen = observed.first();
            edge.last_seen = observed.last();
        }
        edge
    }

    fn to_model(&self, runtime: &str) -> Model {
        Model {
            runtime: runtime.to_string(),
            nodes: self.nodes.values().map(|n| n.to_node()).collect(),
            edges: self.edges.keys().map(|k| self.edge(k)).collect(),
        }
    }
}

#[derive(Debug)]
struct RuntimeModel {
    graph: RwLock<Graph>,
}

impl RuntimeModel {
    fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
        }
    }
}

/// Summary of [`ModelManager::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub nodes_touched: usize,
    pub edges_added: usize,
}

/// Owns the dependency graph of every runtime.
///
/// Structural changes to one runtime are serialized by that runtime's
/// lock. Queries take the read side and run concurrently with each other.
///
/// ```rust
/// use meshtopo_model::ModelManager;
/// use meshtopo_types::TimeRange;
///
/// let manager = ModelManager::new();
/// let gateway = manager.get_or_generate_node("mesh", "default", "hr", "gateway");
/// let employee = manager.get_or_generate_node("mesh", "default", "hr", "employee");
/// manager.add_link(&gateway, &employee, "employee", None).unwrap();
///
/// let model = manager.get_instance_dependency_model(TimeRange::ALL, "mesh", "default", "hr");
/// assert_eq!(model.nodes.len(), 2);
/// assert_eq!(model.edges.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ModelManager {
    runtimes: RwLock<BTreeMap<String, Arc<RuntimeModel>>>,
    generation: Arc<AtomicU64>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter bumped by every change that a snapshot would capture.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn runtime_model(&self, runtime: &str) -> Arc<RuntimeModel> {
        // Fast path
        {
            let runtimes = self.runtimes.read();
            if let Some(model) = runtimes.get(runtime) {
                return model.clone();
            }
        }

        // Slow path
        let mut runtimes = self.runtimes.write();
        runtimes
            .entry(runtime.to_string())
            .or_insert_with(|| Arc::new(RuntimeModel::new()))
            .clone()
    }

    fn existing_runtime(&self, runtime: &str) -> Option<Arc<RuntimeModel>> {
        self.runtimes.read().get(runtime).cloned()
    }

    pub fn runtimes(&self) -> Vec<String> {
        self.runtimes.read().keys().cloned().collect()
    }

    /// Get the node for a tuple, creating and registering it if needed.
    ///
    /// Concurrent callers for the same tuple always receive the same node.
    pub fn get_or_generate_node(
        &self,
        runtime: &str,
        namespace: &str,
        instance: &str,
        component: &str,
    ) -> Arc<NodeState> {
        self.node_for(&NodeId::new(runtime, namespace, instance, component))
    }

    pub fn node_for(&self, id: &NodeId) -> Arc<NodeState> {
        let runtime = self.runtime_model(&id.runtime);

        // Fast path: node already registered
        {
            let graph = runtime.graph.read();
            if let Some(node) = graph.nodes.get(id) {
                return node.clone();
            }
        }

        // Slow path: double-check under the write lock
        let mut graph = runtime.graph.write();
        let (node, created) = graph.ensure_node(id, &self.generation);
        if created {
            debug!(runtime = %id.runtime, node = %id, "node registered");
        }
        node
    }

    /// Get or create the node and record `attributes` on it.
    ///
    /// Attributes are written while the runtime's lock is held, so a
    /// concurrent [`remove_node`](Self::remove_node) either drops the node
    /// with its attributes or runs first and the node is registered again.
    pub fn upsert_node(&self, id: &NodeId, attributes: NodeAttributes<'_>) -> Arc<NodeState> {
        let runtime = self.runtime_model(&id.runtime);
        {
            let graph = runtime.graph.read();
            if let Some(node) = graph.nodes.get(id) {
                attributes.record(node);
                return node.clone();
            }
        }

        let mut graph = runtime.graph.write();
        let (node, created) = graph.ensure_node(id, &self.generation);
        attributes.record(&node);
        if created {
            debug!(runtime = %id.runtime, node = %id, "node registered");
        }
        node
    }

    pub fn get_node(
        &self,
        runtime: &str,
        namespace: &str,
        instance: &str,
        component: &str,
    ) -> Option<Arc<NodeState>> {
        let id = NodeId::new(runtime, namespace, instance, component);
        let model = self.existing_runtime(runtime)?;
        let graph = model.graph.read();
        graph.nodes.get(&id).cloned()
    }

    /// Insert `source -> destination` under `service`, creating missing endpoints.
    ///
    /// Returns `Ok(true)` if the edge is new. Re-adding an existing edge only
    /// widens its observation interval.
    pub fn add_edge(
        &self,
        source: &NodeId,
        destination: &NodeId,
        service: &str,
        observed_at: Option<Timestamp>,
    ) -> Result<bool, ModelError> {
        let attributes = NodeAttributes {
            observed_at,
            ..NodeAttributes::default()
        };
        self.add_edge_with(
            (source, attributes),
            (destination, attributes),
            service,
            observed_at,
        )
    }

    /// [`add_edge`](Self::add_edge), also recording attributes on each
    /// endpoint under the same lock as the edge.
    pub fn add_edge_with(
        &self,
        (source, source_attributes): (&NodeId, NodeAttributes<'_>),
        (destination, destination_attributes): (&NodeId, NodeAttributes<'_>),
        service: &str,
        observed_at: Option<Timestamp>,
    ) -> Result<bool, ModelError> {
        if source.runtime != destination.runtime {
            return Err(ModelError::CrossRuntimeEdge {
                from: source.runtime.clone(),
                to: destination.runtime.clone(),
            });
        }
        let runtime = self.runtime_model(&source.runtime);
        let key = EdgeKey::new(source.clone(), destination.clone(), service);

        // Fast path: edge exists, only the observation interval moves
        {
            let graph = runtime.graph.read();
            if let Some(observed) = graph.edges.get(&key) {
                if let Some(ts) = observed_at {
                    observed.observe(ts);
                }
                for (id, attributes) in [(source, source_attributes), (destination, destination_attributes)] {
                    if let Some(node) = graph.nodes.get(id) {
                        attributes.record(node);
                    }
                }
                return Ok(false);
            }
        }

        let mut graph = runtime.graph.write();
        let (src, _) = graph.ensure_node(source, &self.generation);
        let (dst, _) = graph.ensure_node(destination, &self.generation);
        source_attributes.record(&src);
        destination_attributes.record(&dst);
        let added = graph.insert_edge(key.clone(), Observed::at(observed_at));
        if added {
            self.bump();
            debug!(
                runtime = %source.runtime,
                from = %source,
                to = %destination,
                service,
                "edge added"
            );
        } else if let (Some(ts), Some(observed)) = (observed_at, graph.edges.get(&key)) {
            // raced with another writer between the two locks
            observed.observe(ts);
        }
        Ok(added)
    }

    /// Link two already-resolved nodes.
    pub fn add_link(
        &self,
        source: &NodeState,
        destination: &NodeState,
        service: &str,
        observed_at: Option<Timestamp>,
    ) -> Result<bool, ModelError> {
        self.add_edge(source.id(), destination.id(), service, observed_at)
    }

    /// Delete a node and every edge touching it. Returns false if it did not exist.
    pub fn remove_node(
        &self,
        runtime: &str,
        namespace: &str,
        instance: &str,
        component: &str,
    ) -> bool {
        let Some(model) = self.existing_runtime(runtime) else {
            return false;
        };
        let id = NodeId::new(runtime, namespace, instance, component);
        let removed = model.graph.write().remove_node(&id);
        match removed {
            Some(edges) => {
                self.bump();
                info!(runtime, node = %id, edges, "node removed");
                true
            }
            None => false,
        }
    }

    /// Apply a planned set of mutations.
    ///
    /// The whole plan is validated before the first mutation is applied.
    pub fn apply(&self, mutations: &[Mutation]) -> Result<ApplyOutcome, ModelError> {
        for mutation in mutations {
            if let Mutation::Link {
                source,
                destination,
                ..
            } = mutation
            {
                if source.runtime != destination.runtime {
                    return Err(ModelError::CrossRuntimeEdge {
                        from: source.runtime.clone(),
                        to: destination.runtime.clone(),
                    });
                }
            }
        }

        let mut outcome = ApplyOutcome::default();
        for mutation in mutations {
            match mutation {
                Mutation::UpsertNode {
                    id,
                    service,
                    observed_at,
                } => {
                    self.upsert_node(
                        id,
                        NodeAttributes {
                            service: service.as_deref(),
                            observed_at: Some(*observed_at),
                            ..NodeAttributes::default()
                        },
                    );
                    outcome.nodes_touched += 1;
                }
                Mutation::Link {
                    source,
                    destination,
                    service,
                    observed_at,
                } => {
                    if self.add_edge(source, destination, service, Some(*observed_at))? {
                        outcome.edges_added += 1;
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// The whole graph of one runtime.
    pub fn get_runtime_dependency_model(&self, range: TimeRange, runtime: &str) -> Model {
        self.scoped_model(range, runtime, |_| true, |_| true)
    }

    /// Nodes of `namespace` plus everything they reach through namespace-local callers.
    pub fn get_namespace_dependency_model(
        &self,
        range: TimeRange,
        runtime: &str,
        namespace: &str,
    ) -> Model {
        self.scoped_model(
            range,
            runtime,
            |id| id.in_namespace(namespace),
            |id| id.in_namespace(namespace),
        )
    }

    /// Nodes of one instance plus everything they reach through instance-local callers.
    pub fn get_instance_dependency_model(
        &self,
        range: TimeRange,
        runtime: &str,
        namespace: &str,
        instance: &str,
    ) -> Model {
        self.scoped_model(
            range,
            runtime,
            |id| id.in_instance(namespace, instance),
            |id| id.in_instance(namespace, instance),
        )
    }

    /// One component plus everything it reaches through its instance.
    pub fn get_component_dependency_model(
        &self,
        range: TimeRange,
        runtime: &str,
        namespace: &str,
        instance: &str,
        component: &str,
    ) -> Model {
        self.scoped_model(
            range,
            runtime,
            |id| id.in_instance(namespace, instance) && id.component == component,
            |id| id.in_instance(namespace, instance),
        )
    }

    /// Depth-first walk from every visible seed, following visible outgoing
    /// edges whose source satisfies `follow`.
    fn scoped_model<S, F>(&self, range: TimeRange, runtime: &str, seed: S, follow: F) -> Model
    where
        S: Fn(&NodeId) -> bool,
        F: Fn(&NodeId) -> bool,
    {
        let mut model = Model::empty(runtime);
        if range.is_empty() {
            return model;
        }
        let Some(scope) = self.existing_runtime(runtime) else {
            return model;
        };
        let graph = scope.graph.read();

        let mut stack: Vec<&NodeId> = graph
            .nodes
            .iter()
            .filter(|(id, node)| seed(*id) && node.observed.visible(range))
            .map(|(id, _)| id)
            .collect();
        let mut visited: BTreeSet<&NodeId> = BTreeSet::new();
        let mut edges: BTreeSet<&EdgeKey> = BTreeSet::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) || !follow(id) {
                continue;
            }
            let Some(keys) = graph.outgoing.get(id) else {
                continue;
            };
            for key in keys {
                let visible = graph
                    .edges
                    .get(key)
                    .is_some_and(|observed| observed.visible(range));
                if visible {
                    edges.insert(key);
                    stack.push(&key.destination);
                }
            }
        }

        model.nodes = visited
            .into_iter()
            .filter_map(|id| graph.nodes.get(id))
            .map(|node| node.to_node())
            .collect();
        model.edges = edges.into_iter().map(|key| graph.edge(key)).collect();
        model
    }

    /// Every runtime's full model.
    pub fn current_models(&self) -> BTreeMap<String, Model> {
        let runtimes = self.runtimes.read();
        runtimes
            .iter()
            .map(|(name, scope)| (name.clone(), scope.graph.read().to_model(name)))
            .collect()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::new(self.current_models())
    }

    /// Replace the whole graph with the contents of a snapshot.
    pub fn restore(&self, snapshot: ModelSnapshot) {
        let mut restored = BTreeMap::new();
        for (name, model) in snapshot.models {
            let scope = RuntimeModel::new();
            {
                let mut graph = scope.graph.write();
                for node in model.nodes {
                    let id = node.id.clone();
                    graph
                        .nodes
                        .insert(id, Arc::new(NodeState::from_node(node, self.generation.clone())));
                }
                for edge in model.edges {
                    graph.ensure_node(&edge.source, &self.generation);
                    graph.ensure_node(&edge.destination, &self.generation);
                    let observed = Observed::from_bounds(edge.first_seen, edge.last_seen);
                    graph.insert_edge(edge.key(), observed);
                }
            }
            restored.insert(name, Arc::new(scope));
        }
        *self.runtimes.write() = restored;
        self.bump();
    }

    pub fn node_count(&self, runtime: &str) -> usize {
        self.existing_runtime(runtime)
            .map_or(0, |scope| scope.graph.read().nodes.len())
    }

    pub fn edge_count(&self, runtime: &str) -> usize {
        self.existing_runtime(runtime)
            .map_or(0, |scope| scope.graph.read().edges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ns: &str, inst: &str, comp: &str) -> NodeId {
        NodeId::new("mesh", ns, inst, comp)
    }

    /// A -> B, A -> C, B -> F, C -> D (D in another instance), E isolated in instance "hr".
    fn sample() -> ModelManager {
        let manager = ModelManager::new();
        let a = id("default", "hr", "a");
        let b = id("default", "hr", "b");
        let c = id("default", "hr", "c");
        let d = id("default", "stock", "d");
        let f = id("other", "payments", "f");
        manager.add_edge(&a, &b, "", None).unwrap();
        manager.add_edge(&a, &c, "", None).unwrap();
        manager.add_edge(&b, &f, "", None).unwrap();
        manager.add_edge(&c, &d, "", None).unwrap();
        manager.get_or_generate_node("mesh", "default", "hr", "e");
        manager
    }

    #[test]
    fn test_node_identity_under_concurrency() {
        let manager = Arc::new(ModelManager::new());
        let nodes: Vec<Arc<NodeState>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let manager = manager.clone();
                    s.spawn(move || manager.get_or_generate_node("mesh", "default", "hr", "employee"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(nodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(manager.node_count("mesh"), 1);
    }

    #[test]
    fn test_attributes_never_lost_to_concurrent_remove() {
        let manager = ModelManager::new();
        let gateway = id("default", "hr", "gateway");
        let employee = id("default", "hr", "employee");

        for round in 0..200 {
            std::thread::scope(|s| {
                s.spawn(|| {
                    manager.upsert_node(
                        &gateway,
                        NodeAttributes {
                            instance_kind: Some("Cell"),
                            service: Some("gateway"),
                            observed_at: Some(round),
                        },
                    );
                });
                s.spawn(|| {
                    manager
                        .add_edge_with(
                            (&gateway, NodeAttributes::kind("Cell")),
                            (&employee, NodeAttributes::kind("Composite")),
                            "employee",
                            Some(round),
                        )
                        .unwrap();
                });
                s.spawn(|| manager.remove_node("mesh", "default", "hr", "employee"));
                s.spawn(|| manager.remove_node("mesh", "default", "hr", "gateway"));
            });

            // whatever survived the removes carries its attributes
            let model = manager.get_runtime_dependency_model(TimeRange::ALL, "mesh");
            for node in &model.nodes {
                assert!(node.instance_kind.is_some(), "round {}: {} has no kind", round, node.id);
            }
            for edge in &model.edges {
                assert!(model.has_node(&edge.source.fqn()));
                assert!(model.has_node(&edge.destination.fqn()));
            }
            manager.remove_node("mesh", "default", "hr", "employee");
            manager.remove_node("mesh", "default", "hr", "gateway");
        }
    }

    #[test]
    fn test_add_edge_with_records_endpoint_kinds() {
        let manager = ModelManager::new();
        let a = id("default", "hr", "gateway");
        let b = id("default", "stock", "gateway");
        assert!(manager
            .add_edge_with(
                (&a, NodeAttributes::kind("Cell")),
                (&b, NodeAttributes::kind("Composite")),
                "",
                None,
            )
            .unwrap());
        assert!(!manager
            .add_edge_with(
                (&a, NodeAttributes::kind("Cell")),
                (&b, NodeAttributes::kind("Cell")),
                "",
                None,
            )
            .unwrap());
        let kind = |n: &NodeId| manager.node_for(n).instance_kind();
        assert_eq!(kind(&a).as_deref(), Some("Cell"));
        assert_eq!(kind(&b).as_deref(), Some("Cell"));
    }

    #[test]
    fn test_edge_idempotence() {
        let manager = ModelManager::new();
        let a = id("default", "hr", "a");
        let b = id("default", "hr", "b");
        assert!(manager.add_edge(&a, &b, "svc", Some(10)).unwrap());
        let generation = manager.generation();
        assert!(!manager.add_edge(&a, &b, "svc", Some(20)).unwrap());
        assert_eq!(manager.generation(), generation);
        assert_eq!(manager.edge_count("mesh"), 1);

        // a second service between the same pair is a separate edge
        assert!(manager.add_edge(&a, &b, "other", None).unwrap());
        assert_eq!(manager.edge_count("mesh"), 2);

        let model = manager.get_runtime_dependency_model(TimeRange::ALL, "mesh");
        let edge = model.edges.iter().find(|e| e.service == "svc").unwrap();
        assert_eq!((edge.first_seen, edge.last_seen), (Some(10), Some(20)));
    }

    #[test]
    fn test_cross_runtime_edge_rejected() {
        let manager = ModelManager::new();
        let a = NodeId::new("one", "default", "hr", "a");
        let b = NodeId::new("two", "default", "hr", "b");
        assert!(matches!(
            manager.add_edge(&a, &b, "", None),
            Err(ModelError::CrossRuntimeEdge { .. })
        ));
    }

    #[test]
    fn test_remove_node_cascades() {
        let manager = sample();
        assert!(manager.remove_node("mesh", "default", "hr", "b"));
        assert!(!manager.remove_node("mesh", "default", "hr", "b"));
        assert!(!manager.remove_node("unknown", "default", "hr", "b"));

        let model = manager.get_runtime_dependency_model(TimeRange::ALL, "mesh");
        assert!(!model.has_node("default#hr#b"));
        assert!(!model.edges.iter().any(|e| e.source.component == "b" || e.destination.component == "b"));
        assert_eq!(model.edges.len(), 2);
        // F stays, only its incoming edge is gone
        assert!(model.has_node("other#payments#f"));
    }

    #[test]
    fn test_instance_query_includes_callees_outside_scope() {
        let manager = sample();
        let model = manager.get_instance_dependency_model(TimeRange::ALL, "mesh", "default", "hr");
        let fqns: Vec<String> = model.fqns().into_iter().collect();
        assert_eq!(
            fqns,
            vec![
                "default#hr#a",
                "default#hr#b",
                "default#hr#c",
                "default#hr#e",
                "default#stock#d",
                "other#payments#f",
            ]
        );
        assert_eq!(model.edges.len(), 4);
    }

    #[test]
    fn test_namespace_query_does_not_follow_foreign_callers() {
        let manager = sample();
        let f = id("other", "payments", "f");
        let g = id("other", "payments", "g");
        manager.add_edge(&f, &g, "", None).unwrap();

        let model = manager.get_namespace_dependency_model(TimeRange::ALL, "mesh", "default");
        assert!(model.has_node("other#payments#f"));
        assert!(!model.has_node("other#payments#g"));
    }

    #[test]
    fn test_component_query() {
        let manager = sample();
        let model =
            manager.get_component_dependency_model(TimeRange::ALL, "mesh", "default", "hr", "b");
        assert_eq!(model.fqns().len(), 2);
        assert!(model.has_edge("default#hr#b", "other#payments#f"));

        let missing =
            manager.get_component_dependency_model(TimeRange::ALL, "mesh", "default", "hr", "zz");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_time_range_filtering() {
        let manager = ModelManager::new();
        let a = id("default", "hr", "a");
        let b = id("default", "hr", "b");
        let c = id("default", "hr", "c");
        manager.add_edge(&a, &b, "", Some(1_000)).unwrap();
        manager.add_edge(&a, &c, "", Some(5_000)).unwrap();

        let early = manager.get_runtime_dependency_model(TimeRange::new(0, 2_000), "mesh");
        assert!(early.has_edge("default#hr#a", "default#hr#b"));
        assert!(!early.has_edge("default#hr#a", "default#hr#c"));
        assert!(!early.has_node("default#hr#c"));

        let empty = manager.get_runtime_dependency_model(TimeRange::new(10, 1), "mesh");
        assert!(empty.is_empty());
        assert_eq!(empty.runtime, "mesh");
    }

    #[test]
    fn test_unknown_runtime_is_empty() {
        let manager = ModelManager::new();
        let model = manager.get_namespace_dependency_model(TimeRange::ALL, "nope", "default");
        assert!(model.is_empty());
        assert!(manager.runtimes().is_empty());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let manager = sample();
        manager
            .get_or_generate_node("mesh", "default", "hr", "a")
            .set_instance_kind("Cell");
        let snapshot = manager.snapshot();

        let restored = ModelManager::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.current_models(), manager.current_models());
        assert_eq!(
            restored
                .get_node("mesh", "default", "hr", "a")
                .and_then(|n| n.instance_kind()),
            Some("Cell".to_string())
        );
    }

    #[test]
    fn test_attribute_changes_bump_generation() {
        let manager = ModelManager::new();
        let node = manager.get_or_generate_node("mesh", "default", "hr", "a");
        let start = manager.generation();
        assert!(node.add_service("svc"));
        assert!(!node.add_service("svc"));
        assert!(node.set_instance_kind("Cell"));
        assert!(!node.set_instance_kind("Cell"));
        assert_eq!(manager.generation(), start + 2);
    }
}
