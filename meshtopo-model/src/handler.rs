//! Applies control-plane lifecycle events straight to the model.

use std::sync::Arc;

use meshtopo_types::{ControlEvent, EndpointRef, NodeId, Timestamp};
use tracing::{debug, warn};

use crate::manager::{ModelManager, NodeAttributes};
use crate::ModelError;

/// Applies add-node, add-edge and remove-node events, bypassing windowing.
#[derive(Debug, Clone)]
pub struct ControlHandler {
    manager: Arc<ModelManager>,
}

impl ControlHandler {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    /// Validate and apply one event.
    pub fn try_handle(&self, event: &ControlEvent) -> Result<(), ModelError> {
        match event {
            ControlEvent::AddNode {
                runtime,
                namespace,
                instance,
                component,
                instance_kind,
                timestamp,
            } => {
                require(
                    "addNode",
                    &[
                        ("runtime", runtime),
                        ("namespace", namespace),
                        ("instance", instance),
                        ("component", component),
                        ("instanceKind", instance_kind),
                    ],
                )?;
                let id = NodeId::new(runtime, namespace, instance, component);
                self.manager.upsert_node(
                    &id,
                    NodeAttributes {
                        instance_kind: Some(instance_kind.as_str()),
                        observed_at: observed(*timestamp),
                        ..NodeAttributes::default()
                    },
                );
                debug!(runtime = %runtime, node = %id, "control node added");
            }
            ControlEvent::AddEdge {
                runtime,
                source,
                destination,
                service,
                timestamp,
            } => {
                if runtime.is_empty() {
                    return Err(ModelError::invalid_event("addEdge", "runtime is empty"));
                }
                if !source.is_complete() || !destination.is_complete() {
                    return Err(ModelError::invalid_event(
                        "addEdge",
                        "source and destination need namespace, instance, component and instanceKind",
                    ));
                }
                let observed_at = observed(*timestamp);
                let from = endpoint_id(runtime, source);
                let to = endpoint_id(runtime, destination);
                self.manager.add_edge_with(
                    (&from, endpoint_attributes(source, observed_at)),
                    (&to, endpoint_attributes(destination, observed_at)),
                    service,
                    observed_at,
                )?;
            }
            ControlEvent::RemoveNode {
                runtime,
                namespace,
                instance,
                component,
            } => {
                require(
                    "removeNode",
                    &[
                        ("runtime", runtime),
                        ("namespace", namespace),
                        ("instance", instance),
                        ("component", component),
                    ],
                )?;
                if !self
                    .manager
                    .remove_node(runtime, namespace, instance, component)
                {
                    debug!(runtime = %runtime, namespace = %namespace, instance = %instance, component = %component, "remove for unknown node ignored");
                }
            }
        }
        Ok(())
    }

    /// Apply one event, logging and dropping it if it is invalid.
    pub fn handle(&self, event: &ControlEvent) -> bool {
        match self.try_handle(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = event.name(), error = %e, "dropping control event");
                false
            }
        }
    }

    /// Apply a chunk of events. Invalid events never abort the chunk.
    /// Returns how many were applied.
    pub fn handle_all<'a, I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a ControlEvent>,
    {
        events.into_iter().filter(|event| self.handle(event)).count()
    }
}

fn endpoint_id(runtime: &str, endpoint: &EndpointRef) -> NodeId {
    NodeId::new(
        runtime,
        &endpoint.namespace,
        &endpoint.instance,
        &endpoint.component,
    )
}

fn endpoint_attributes(endpoint: &EndpointRef, observed_at: Option<Timestamp>) -> NodeAttributes<'_> {
    NodeAttributes {
        instance_kind: Some(endpoint.instance_kind.as_str()),
        observed_at,
        ..NodeAttributes::default()
    }
}

fn require(event: &'static str, fields: &[(&str, &String)]) -> Result<(), ModelError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ModelError::invalid_event(
            event,
            format!("missing {}", missing.join(", ")),
        ))
    }
}

fn observed(timestamp: Timestamp) -> Option<Timestamp> {
    (timestamp > 0).then_some(timestamp)
}
