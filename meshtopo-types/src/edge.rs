//! Graph arcs.

use crate::{NodeId, Timestamp};

/// Composite identity of an edge.
///
/// The same pair of nodes may be linked several times under different
/// service labels. Control-plane edges use an empty label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub source: NodeId,
    pub destination: NodeId,
    pub service: String,
}

impl EdgeKey {
    pub fn new(source: NodeId, destination: NodeId, service: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            service: service.into(),
        }
    }
}

/// A directed dependency: `source` calls `destination` through `service`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Edge {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub source: NodeId,

    #[cfg_attr(feature = "minicbor", n(1))]
    pub destination: NodeId,

    #[cfg_attr(feature = "serde", serde(default, rename = "serviceName"))]
    #[cfg_attr(feature = "minicbor", n(2))]
    pub service: String,

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

impl Edge {
    pub fn new(source: NodeId, destination: NodeId, service: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            service: service.into(),
            first_seen: None,
            last_seen: None,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(
            self.source.clone(),
            self.destination.clone(),
            self.service.clone(),
        )
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.destination
    }
}

impl From<EdgeKey> for Edge {
    fn from(key: EdgeKey) -> Self {
        Edge::new(key.source, key.destination, key.service)
    }
}
