//! Channel-based event source.
//!
//! For embedding: another task pushes already-decoded events.

use meshtopo_types::InputEvent;
use tokio::sync::mpsc;

use super::EventSource;

/// Receives events pushed through a tokio channel.
///
/// ```
/// use meshtopo::ChannelSource;
///
/// let (tx, source) = ChannelSource::create("cluster-watch", 64);
/// ```
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::Receiver<InputEvent>,
    description: String,
    disconnected: bool,
}

impl ChannelSource {
    pub fn new(receiver: mpsc::Receiver<InputEvent>, source_description: &str) -> Self {
        Self {
            receiver,
            description: format!("channel: {}", source_description),
            disconnected: false,
        }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn create(source_description: &str, capacity: usize) -> (mpsc::Sender<InputEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx, source_description))
    }
}

impl EventSource for ChannelSource {
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
        None
    }

    fn is_finished(&self) -> bool {
        self.disconnected
    }
}
