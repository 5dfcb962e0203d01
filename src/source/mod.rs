//! Input event sources.
//!
//! Every source yields newline-delimited JSON [`InputEvent`]s: spans and
//! control events mixed in one stream. Blank lines are skipped; malformed
//! lines are logged, counted and skipped without stopping the source.

mod channel;
mod file;
mod stream;

pub use channel::ChannelSource;
pub use file::FileSource;
pub use stream::StreamSource;


use std::fmt::Debug;

use meshtopo_types::InputEvent;
use thiserror::Error;

/// Something that produces input events.
///
/// # Example
///
/// ```no_run
/// use meshtopo::{EventSource, FileSource};
///
/// let mut source = FileSource::new("events.jsonl");
/// let events = source.poll();
/// println!("{} new events from {}", events.len(), source.description());
/// ```
pub trait EventSource: Send + Debug {
    /// Take every event available right now. Never blocks.
    fn poll(&mut self) -> Vec<InputEvent>;

    /// Human-readable origin, used in logs.
    fn description(&self) -> &str;

    /// The most recent read or parse error, if any.
    fn error(&self) -> Option<String>;

    /// True once the source can produce no further events.
    fn is_finished(&self) -> bool;
}

/// Parse one NDJSON line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<InputEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Why a raw line was skipped.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode and parse one raw line. Bytes are only decoded once the whole
/// line is available, so multibyte characters are never cut in half.
pub fn parse_bytes(line: &[u8]) -> Result<Option<InputEvent>, LineError> {
    let line = std::str::from_utf8(line)?;
    Ok(parse_line(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtopo_types::ControlEvent;

    #[test]
    fn test_parse_line_kinds() {
        assert!(parse_line("   ").unwrap().is_none());

        let span = parse_line(
            r#"{"traceId":"t1","spanId":"s1","componentName":"gateway","startTime":10}"#,
        )
        .unwrap();
        assert!(matches!(span, Some(InputEvent::Span(s)) if s.component_name == "gateway"));

        let control = parse_line(
            r#"{"type":"removeNode","runtime":"mesh","namespace":"default","instance":"hr","component":"gateway"}"#,
        )
        .unwrap();
        assert!(matches!(
            control,
            Some(InputEvent::Control(ControlEvent::RemoveNode { .. }))
        ));

        assert!(parse_line("{not json").is_err());
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            parse_bytes(b"{\"traceId\":\"\xc3\"}"),
            Err(LineError::Utf8(_))
        ));
        assert!(matches!(parse_bytes(b"{oops"), Err(LineError::Json(_))));
        assert!(parse_bytes(b"\n").unwrap().is_none());
    }
}
