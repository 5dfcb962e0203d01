//! Stream-based event source.
//!
//! Receives events from an async byte stream such as a TCP connection.

use std::sync::Arc;

use meshtopo_types::InputEvent;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use super::{parse_bytes, EventSource};

const CHANNEL_CAPACITY: usize = 1024;

/// Receives events from a background task reading NDJSON.
///
/// ```
/// use std::io::Cursor;
/// use meshtopo::StreamSource;
///
/// # tokio_test::block_on(async {
/// let data = b"{\"traceId\":\"t1\",\"spanId\":\"s1\",\"startTime\":0}\n";
/// let source = StreamSource::spawn(Cursor::new(data.to_vec()), "example");
/// # });
/// ```
#[derive(Debug)]
pub struct StreamSource {
    receiver: mpsc::Receiver<InputEvent>,
    description: String,
    last_error: Arc<Mutex<Option<String>>>,
    disconnected: bool,
}

impl StreamSource {
    /// Spawn a task reading newline-delimited events from `reader`.
    pub fn spawn<R>(reader: R, description: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let last_error = Arc::new(Mutex::new(None));
        let error_handle = last_error.clone();
        let desc = description.to_string();

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();

            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => match parse_bytes(&line) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(source = %desc, error = %e, "skipping malformed event");
                            *error_handle.lock() = Some(e.to_string());
                        }
                    },
                    Err(e) => {
                        *error_handle.lock() = Some(format!("Read error: {}", e));
                        break;
                    }
                }
            }
        });

        Self {
            receiver: rx,
            description: format!("stream: {}", description),
            last_error,
            disconnected: false,
        }
    }

    /// Build a source fed with raw NDJSON chunks, for instance from a
    /// message bus consumer. A chunk may hold several lines.
    pub fn from_bytes_channel(mut rx: mpsc::Receiver<Vec<u8>>, description: &str) -> Self {
        let (tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let last_error = Arc::new(Mutex::new(None));
        let error_handle = last_error.clone();
        let desc = description.to_string();

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                for line in bytes.split(|&b| b == b'\n') {
                    match parse_bytes(line) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(source = %desc, error = %e, "skipping malformed event");
                            *error_handle.lock() = Some(e.to_string());
                        }
                    }
                }
            }
        });

        Self {
            receiver: event_rx,
            description: format!("stream: {}", description),
            last_error,
            disconnected: false,
        }
    }
}

impl EventSource for StreamSource {
    fn poll(&mut self) -> Vec<InputEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        events
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn is_finished(&self) -> bool {
        self.disconnected
    }
}
