//! Turns an expired trace group into node and edge mutations.

use std::collections::{HashMap, HashSet};

use meshtopo_types::{NodeId, Span, SpanKind, Timestamp};
use tracing::{debug, warn};

use crate::manager::{ApplyOutcome, ModelManager};
use crate::ModelError;

/// One planned change to the dependency model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Make sure the node exists, record a service on it and widen its observed interval.
    UpsertNode {
        id: NodeId,
        service: Option<String>,
        observed_at: Timestamp,
    },
    /// Add `source -> destination` labeled with the callee's service.
    Link {
        source: NodeId,
        destination: NodeId,
        service: String,
        observed_at: Timestamp,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Spans whose operation name starts with this prefix do not produce nodes.
    pub ignored_operation_prefix: Option<String>,
    pub default_runtime: String,
    pub default_namespace: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            ignored_operation_prefix: None,
            default_runtime: "default".to_string(),
            default_namespace: "default".to_string(),
        }
    }
}

/// Builds graph mutations from the spans of one trace.
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    config: TopologyConfig,
}

impl TopologyBuilder {
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    fn is_ignored(&self, span: &Span) -> bool {
        match self.config.ignored_operation_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => span.operation_name.starts_with(prefix),
            _ => false,
        }
    }

    /// The node a span belongs to, or `None` if it produces no node.
    pub fn node_id(&self, span: &Span) -> Option<NodeId> {
        if span.component_name.is_empty() || self.is_ignored(span) {
            return None;
        }
        let runtime = non_empty_or(&span.runtime, &self.config.default_runtime);
        let namespace = non_empty_or(&span.namespace, &self.config.default_namespace);
        let instance = non_empty_or(&span.instance, &span.component_name);
        Some(NodeId::new(
            runtime,
            namespace,
            instance,
            span.component_name.as_str(),
        ))
    }

    /// Plan the mutations for one batch without touching any model.
    ///
    /// Spans are walked once in start-time order. A span links to its
    /// parent only when the parent is part of the same batch. Spans that
    /// produce no node (no component, or an ignored operation) pass their
    /// parent's node on to their own children.
    ///
    /// A client span immediately followed by a server sibling is the caller
    /// half of one hop and is skipped; the server half stands for it. Root
    /// spans have no parent to link through, so a client root directly
    /// followed by a server root links the two.
    ///
    /// Spans without an id are dropped with a warning. A batch mixing trace
    /// ids is rejected as a whole.
    pub fn plan(&self, spans: &[Span]) -> Result<Vec<Mutation>, ModelError> {
        let mut ordered: Vec<&Span> = Vec::with_capacity(spans.len());
        let mut ids = HashSet::with_capacity(spans.len());
        for span in spans {
            if span.span_id.is_empty() {
                warn!(
                    trace_id = %span.trace_id,
                    operation = %span.operation_name,
                    "skipping span without id"
                );
                continue;
            }
            if let Some(first) = ordered.first() {
                if span.trace_id != first.trace_id {
                    return Err(ModelError::InvalidBatch(format!(
                        "batch mixes traces {} and {}",
                        first.trace_id, span.trace_id
                    )));
                }
            }
            if !ids.insert(span.span_id.as_str()) {
                debug!(trace_id = %span.trace_id, span_id = %span.span_id, "duplicate span in batch");
            }
            ordered.push(span);
        }
        ordered.sort_by_key(|span| span.start_time);
        let client_halves = client_halves(&ordered);

        let mut resolved: HashMap<&str, Option<NodeId>> = HashMap::with_capacity(ordered.len());
        let mut previous_root: Option<(SpanKind, Option<NodeId>)> = None;
        let mut mutations = Vec::new();

        for (position, span) in ordered.iter().enumerate() {
            if client_halves.contains(&position) {
                continue;
            }
            let root = span.is_root();
            let parent = if root {
                None
            } else {
                span.parent_id
                    .as_deref()
                    .and_then(|parent| resolved.get(parent).cloned().flatten())
            };

            let id = self.node_id(span);
            if root {
                if let (Some((SpanKind::Client, Some(caller))), SpanKind::Server, Some(callee)) =
                    (&previous_root, span.kind, &id)
                {
                    if caller != callee {
                        mutations.push(Mutation::Link {
                            source: caller.clone(),
                            destination: callee.clone(),
                            service: span.service_name.clone(),
                            observed_at: span.start_time,
                        });
                    }
                }
                previous_root = Some((span.kind, id.clone()));
            }

            let Some(id) = id else {
                resolved.insert(span.span_id.as_str(), parent);
                continue;
            };
            mutations.push(Mutation::UpsertNode {
                id: id.clone(),
                service: (!span.service_name.is_empty()).then(|| span.service_name.clone()),
                observed_at: span.start_time,
            });
            if let Some(parent) = parent {
                if parent != id {
                    mutations.push(Mutation::Link {
                        source: parent,
                        destination: id.clone(),
                        service: span.service_name.clone(),
                        observed_at: span.start_time,
                    });
                }
            }
            resolved.insert(span.span_id.as_str(), Some(id));
        }

        Ok(mutations)
    }

    /// Plan and apply one batch.
    pub fn build(&self, spans: &[Span], manager: &ModelManager) -> Result<ApplyOutcome, ModelError> {
        let plan = self.plan(spans)?;
        manager.apply(&plan)
    }
}

/// Positions of client spans whose next sibling in start order is a server span.
fn client_halves(ordered: &[&Span]) -> HashSet<usize> {
    let mut siblings: HashMap<&str, Vec<usize>> = HashMap::new();
    for (position, span) in ordered.iter().enumerate() {
        if span.is_root() {
            continue;
        }
        if let Some(parent) = span.parent_id.as_deref() {
            siblings.entry(parent).or_default().push(position);
        }
    }
    siblings
        .values()
        .flat_map(|group| group.windows(2))
        .filter(|pair| {
            ordered[pair[0]].kind == SpanKind::Client && ordered[pair[1]].kind == SpanKind::Server
        })
        .map(|pair| pair[0])
        .collect()
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtopo_types::TimeRange;

    fn builder() -> TopologyBuilder {
        TopologyBuilder::new(TopologyConfig {
            ignored_operation_prefix: Some("health".to_string()),
            default_runtime: "mesh".to_string(),
            default_namespace: "default".to_string(),
        })
    }

    fn span(id: &str, parent: Option<&str>, component: &str, service: &str, start: Timestamp) -> Span {
        Span::new("t1", id, parent, component, start)
            .service(service)
            .located("mesh", "default", "hr")
    }

    fn links(plan: &[Mutation]) -> Vec<(&str, &str)> {
        plan.iter()
            .filter_map(|m| match m {
                Mutation::Link {
                    source,
                    destination,
                    ..
                } => Some((source.component.as_str(), destination.component.as_str())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parent_child_produces_edge() {
        let manager = ModelManager::new();
        let spans = vec![
            span("s1", None, "X", "X", 0),
            span("s2", Some("s1"), "Y", "Y", 5),
        ];
        let outcome = builder().build(&spans, &manager).unwrap();
        assert_eq!(outcome.edges_added, 1);

        let model = manager.get_runtime_dependency_model(TimeRange::ALL, "mesh");
        assert!(model.has_node("default#hr#X"));
        assert!(model.has_node("default#hr#Y"));
        assert!(model.has_service_edge("default#hr#X", "default#hr#Y", "Y"));
    }

    #[test]
    fn test_parent_outside_batch_gives_node_only() {
        let plan = builder()
            .plan(&[span("s2", Some("elsewhere"), "Y", "Y", 5)])
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], Mutation::UpsertNode { .. }));
    }

    #[test]
    fn test_out_of_order_arrival_still_links() {
        let spans = vec![
            span("s2", Some("s1"), "Y", "Y", 5),
            span("s1", None, "X", "X", 0),
        ];
        let plan = builder().plan(&spans).unwrap();
        assert!(plan.iter().any(|m| matches!(m, Mutation::Link { .. })));
    }

    #[test]
    fn test_skips_self_links_and_ignored_operations() {
        let spans = vec![
            span("s1", None, "X", "X", 0),
            span("s2", Some("s1"), "X", "X", 1),
            span("s3", Some("s2"), "Z", "Z", 2).operation("health-check"),
            span("s4", Some("s3"), "W", "W", 3),
        ];
        let plan = builder().plan(&spans).unwrap();
        let links: Vec<(&str, &str)> = plan
            .iter()
            .filter_map(|m| match m {
                Mutation::Link {
                    source,
                    destination,
                    ..
                } => Some((source.component.as_str(), destination.component.as_str())),
                _ => None,
            })
            .collect();
        // X -> X is dropped, Z is ignored so W links to the nearest resolved ancestor
        assert_eq!(links, vec![("X", "W")]);
    }

    #[test]
    fn test_componentless_span_passes_parent_through() {
        let spans = vec![
            span("s1", None, "X", "X", 0),
            span("s2", Some("s1"), "", "", 1),
            span("s3", Some("s2"), "Y", "Y", 2),
        ];
        let plan = builder().plan(&spans).unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_defaults_fill_missing_location() {
        let spans = vec![Span::new("t1", "s1", None, "orders", 0)];
        let plan = builder().plan(&spans).unwrap();
        match &plan[0] {
            Mutation::UpsertNode { id, service, .. } => {
                assert_eq!(id, &NodeId::new("mesh", "default", "orders", "orders"));
                assert_eq!(service, &None);
            }
            other => panic!("unexpected mutation: {:?}", other),
        }
    }

    #[test]
    fn test_node_id_for_single_span() {
        let b = builder();
        assert_eq!(
            b.node_id(&span("s1", None, "X", "X", 0)),
            Some(NodeId::new("mesh", "default", "hr", "X"))
        );
        assert_eq!(b.node_id(&span("s2", None, "", "", 0)), None);
        assert_eq!(
            b.node_id(&span("s3", None, "X", "X", 0).operation("healthz")),
            None
        );
    }

    #[test]
    fn test_malformed_batch_applies_nothing() {
        let manager = ModelManager::new();
        let mut bad = span("s2", Some("s1"), "Y", "Y", 5);
        bad.trace_id = "t2".to_string();
        let spans = vec![span("s1", None, "X", "X", 0), bad];

        assert!(matches!(
            builder().build(&spans, &manager),
            Err(ModelError::InvalidBatch(_))
        ));
        assert_eq!(manager.node_count("mesh"), 0);
        assert!(builder().plan(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_span_without_id_is_dropped_and_rest_still_builds() {
        let manager = ModelManager::new();
        let spans = vec![
            span("s1", None, "X", "X", 0),
            span("", Some("s1"), "Z", "Z", 2),
            span("s2", Some("s1"), "Y", "Y", 5),
        ];
        let outcome = builder().build(&spans, &manager).unwrap();
        assert_eq!(outcome.edges_added, 1);

        let model = manager.get_runtime_dependency_model(TimeRange::ALL, "mesh");
        assert!(model.has_edge("default#hr#X", "default#hr#Y"));
        assert!(!model.has_node("default#hr#Z"));
    }

    #[test]
    fn test_client_half_of_hop_is_skipped() {
        let spans = vec![
            span("s1", None, "X", "X", 0).with_kind(SpanKind::Server),
            span("s2", Some("s1"), "X-egress", "Y", 1).with_kind(SpanKind::Client),
            span("s2", Some("s1"), "Y", "Y", 2).with_kind(SpanKind::Server),
            span("s3", Some("s2"), "Z", "Z", 3).with_kind(SpanKind::Server),
        ];
        let plan = builder().plan(&spans).unwrap();
        assert_eq!(links(&plan), vec![("X", "Y"), ("Y", "Z")]);
        assert!(!plan.iter().any(|m| matches!(
            m,
            Mutation::UpsertNode { id, .. } if id.component == "X-egress"
        )));
    }

    #[test]
    fn test_unpaired_client_span_still_counts() {
        let spans = vec![
            span("s1", None, "X", "X", 0).with_kind(SpanKind::Server),
            span("s2", Some("s1"), "Y", "Y", 1).with_kind(SpanKind::Client),
            span("s3", Some("s1"), "Z", "Z", 2).with_kind(SpanKind::Internal),
        ];
        let plan = builder().plan(&spans).unwrap();
        assert_eq!(links(&plan), vec![("X", "Y"), ("X", "Z")]);
    }

    #[test]
    fn test_client_root_links_to_following_server_root() {
        let spans = vec![
            span("t1", None, "Y", "Y", 4).with_kind(SpanKind::Server),
            span("t1", None, "X", "X", 0).with_kind(SpanKind::Client),
            span("s2", Some("t1"), "Z", "Z", 6),
        ];
        let plan = builder().plan(&spans).unwrap();
        // the server root is resolved last under the shared id, so Z hangs off Y
        assert_eq!(links(&plan), vec![("X", "Y"), ("Y", "Z")]);
    }
}
