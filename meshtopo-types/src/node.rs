//! Graph vertices.

use std::collections::BTreeSet;
use std::fmt;

use crate::Timestamp;

/// Separator used in fully qualified node names.
pub const FQN_SEPARATOR: char = '#';

/// Identity of a node: one component of one instance, scoped to a runtime.
///
/// Two nodes are the same node exactly when their ids are equal. The
/// instance kind and observed services never take part in identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct NodeId {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub runtime: String,

    #[cfg_attr(feature = "minicbor", n(1))]
    pub namespace: String,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub instance: String,

    #[cfg_attr(feature = "minicbor", n(3))]
    pub component: String,
}

impl NodeId {
    pub fn new(
        runtime: impl Into<String>,
        namespace: impl Into<String>,
        instance: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            namespace: namespace.into(),
            instance: instance.into(),
            component: component.into(),
        }
    }

    /// `namespace#instance#component`, unique within a runtime.
    pub fn fqn(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.namespace,
            self.instance,
            self.component,
            sep = FQN_SEPARATOR
        )
    }

    /// Parse an fqn back into an id for the given runtime.
    pub fn from_fqn(runtime: impl Into<String>, fqn: &str) -> Option<Self> {
        let mut parts = fqn.splitn(3, FQN_SEPARATOR);
        let namespace = parts.next()?;
        let instance = parts.next()?;
        let component = parts.next()?;
        Some(Self::new(runtime, namespace, instance, component))
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }

    pub fn in_instance(&self, namespace: &str, instance: &str) -> bool {
        self.namespace == namespace && self.instance == instance
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqn())
    }
}

/// A vertex of the dependency graph as seen by query consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Node {
    #[cfg_attr(feature = "serde", serde(flatten))]
    #[cfg_attr(feature = "minicbor", n(0))]
    pub id: NodeId,

    /// Deployment kind of the owning instance (for example `Cell` or `Composite`).
    #[cfg_attr(
        feature = "serde",
        serde(default, rename = "instanceKind", skip_serializing_if = "Option::is_none")
    )]
    #[cfg_attr(feature = "minicbor", n(1))]
    pub instance_kind: Option<String>,

    /// Logical services observed on this component.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeSet::is_empty")
    )]
    #[cfg_attr(feature = "minicbor", n(2))]
    pub services: BTreeSet<String>,

    #[cfg_attr(
        feature = "serde",
        serde(default, rename = "firstSeen", skip_serializing_if = "Option::is_none")
    )]
    #[cfg_attr(feature = "minicbor", n(3))]
    pub first_seen: Option<Timestamp>,

    #[cfg_attr(
        feature = "serde",
        serde(default, rename = "lastSeen", skip_serializing_if = "Option::is_none")
    )]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub last_seen: Option<Timestamp>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn fqn(&self) -> String {
        self.id.fqn()
    }

    /// Widen the observed interval to include `ts`.
    pub fn observe(&mut self, ts: Timestamp) {
        self.first_seen = Some(self.first_seen.map_or(ts, |first| first.min(ts)));
        self.last_seen = Some(self.last_seen.map_or(ts, |last| last.max(ts)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqn_roundtrip() {
        let id = NodeId::new("mesh", "default", "hr", "employee");
        assert_eq!(id.fqn(), "default#hr#employee");
        assert_eq!(NodeId::from_fqn("mesh", &id.fqn()), Some(id));
        assert_eq!(NodeId::from_fqn("mesh", "default#hr"), None);
    }

    #[test]
    fn test_observe_widens_interval() {
        let mut node = Node::new(NodeId::new("mesh", "default", "hr", "employee"));
        node.observe(500);
        node.observe(200);
        node.observe(800);
        assert_eq!(node.first_seen, Some(200));
        assert_eq!(node.last_seen, Some(800));
    }

    #[test]
    fn test_identity_ignores_kind() {
        let id = NodeId::new("mesh", "default", "hr", "employee");
        let mut a = Node::new(id.clone());
        a.instance_kind = Some("Cell".into());
        let b = Node::new(id);
        assert_eq!(a.id, b.id);
        assert_ne!(a, b);
    }
}
