//! Distributed-tracing spans as they arrive from the tracing receiver.

use crate::Timestamp;

/// Role of a span within its RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum SpanKind {
    Client,
    Server,
    Producer,
    Consumer,
    #[default]
    Internal,
}

/// One traced unit of work.
///
/// `runtime`, `namespace` and `instance` are tags added by the receiver for
/// the cell the span ran in. They may be empty, in which case the topology
/// builder resolves them to its configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub parent_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub runtime: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub namespace: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub instance: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub component_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub service_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub operation_name: String,
    #[cfg_attr(feature = "serde", serde(default, rename = "spanKind"))]
    pub kind: SpanKind,
    /// Start of the span, milliseconds since the Unix epoch.
    pub start_time: Timestamp,
    /// Duration in milliseconds.
    #[cfg_attr(feature = "serde", serde(default))]
    pub duration: i64,
}

impl Span {
    /// A span with the fields every topology decision needs.
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_id: Option<&str>,
        component_name: impl Into<String>,
        start_time: Timestamp,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.map(str::to_string),
            component_name: component_name.into(),
            start_time,
            ..Self::default()
        }
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service_name = service.into();
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation_name = operation.into();
        self
    }

    pub fn located(
        mut self,
        runtime: impl Into<String>,
        namespace: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        self.runtime = runtime.into();
        self.namespace = namespace.into();
        self.instance = instance.into();
        self
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Root spans have no parent, or an empty or self-referencing parent id.
    pub fn is_root(&self) -> bool {
        match self.parent_id.as_deref() {
            None | Some("") => true,
            Some(parent) => parent == self.span_id,
        }
    }

    pub fn end_time(&self) -> Timestamp {
        self.start_time.saturating_add(self.duration)
    }
}
