//! Input events: spans and control-plane lifecycle events.

use crate::{Span, Timestamp};

/// One endpoint of a control-plane edge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EndpointRef {
    #[cfg_attr(feature = "serde", serde(default))]
    pub namespace: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub instance: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub component: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub instance_kind: String,
}

impl EndpointRef {
    pub fn new(
        namespace: impl Into<String>,
        instance: impl Into<String>,
        component: impl Into<String>,
        instance_kind: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            instance: instance.into(),
            component: component.into(),
            instance_kind: instance_kind.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !(self.namespace.is_empty()
            || self.instance.is_empty()
            || self.component.is_empty()
            || self.instance_kind.is_empty())
    }
}

/// Lifecycle events emitted by the cluster watcher. They bypass windowing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum ControlEvent {
    AddNode {
        #[cfg_attr(feature = "serde", serde(default))]
        runtime: String,
        #[cfg_attr(feature = "serde", serde(default))]
        namespace: String,
        #[cfg_attr(feature = "serde", serde(default))]
        instance: String,
        #[cfg_attr(feature = "serde", serde(default))]
        component: String,
        #[cfg_attr(feature = "serde", serde(default))]
        instance_kind: String,
        #[cfg_attr(feature = "serde", serde(default))]
        timestamp: Timestamp,
    },
    AddEdge {
        #[cfg_attr(feature = "serde", serde(default))]
        runtime: String,
        source: EndpointRef,
        destination: EndpointRef,
        #[cfg_attr(feature = "serde", serde(default))]
        service: String,
        #[cfg_attr(feature = "serde", serde(default))]
        timestamp: Timestamp,
    },
    RemoveNode {
        #[cfg_attr(feature = "serde", serde(default))]
        runtime: String,
        #[cfg_attr(feature = "serde", serde(default))]
        namespace: String,
        #[cfg_attr(feature = "serde", serde(default))]
        instance: String,
        #[cfg_attr(feature = "serde", serde(default))]
        component: String,
    },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::AddNode { .. } => "addNode",
            ControlEvent::AddEdge { .. } => "addEdge",
            ControlEvent::RemoveNode { .. } => "removeNode",
        }
    }

    pub fn runtime(&self) -> &str {
        match self {
            ControlEvent::AddNode { runtime, .. }
            | ControlEvent::AddEdge { runtime, .. }
            | ControlEvent::RemoveNode { runtime, .. } => runtime,
        }
    }
}

/// One line of the newline-delimited JSON input stream.
///
/// Control events carry a `"type"` tag. Anything else is parsed as a span.
///
/// ```rust
/// # #[cfg(feature = "serde")] {
/// use meshtopo_types::InputEvent;
///
/// let line = r#"{"type":"removeNode","runtime":"mesh","namespace":"default","instance":"hr","component":"employee"}"#;
/// let event: InputEvent = serde_json::from_str(line).unwrap();
/// assert!(matches!(event, InputEvent::Control(_)));
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum InputEvent {
    Control(ControlEvent),
    Span(Span),
}

impl From<Span> for InputEvent {
    fn from(span: Span) -> Self {
        InputEvent::Span(span)
    }
}

impl From<ControlEvent> for InputEvent {
    fn from(event: ControlEvent) -> Self {
        InputEvent::Control(event)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_json() {
        let line = r#"{
            "type": "addEdge",
            "runtime": "mesh",
            "source": {"namespace": "default", "instance": "hr", "component": "gateway", "instanceKind": "Cell"},
            "destination": {"namespace": "default", "instance": "stock", "component": "gateway", "instanceKind": "Cell"},
            "timestamp": 42
        }"#;
        let event: InputEvent = serde_json::from_str(line).unwrap();
        match event {
            InputEvent::Control(ControlEvent::AddEdge {
                source,
                destination,
                service,
                timestamp,
                ..
            }) => {
                assert!(source.is_complete());
                assert_eq!(destination.instance, "stock");
                assert_eq!(service, "");
                assert_eq!(timestamp, 42);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_untyped_line_is_span() {
        let line = r#"{"traceId":"t","spanId":"s","componentName":"gw","startTime":5}"#;
        let event: InputEvent = serde_json::from_str(line).unwrap();
        assert!(matches!(event, InputEvent::Span(ref s) if s.span_id == "s"));
    }
}
