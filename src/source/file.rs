//! File-based event source.
//!
//! Follows an NDJSON file the way `tail -f` does.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use meshtopo_types::InputEvent;
use tracing::{info, warn};

use super::{parse_bytes, EventSource};

/// Reads events appended to a newline-delimited JSON file.
///
/// Each poll reads from where the previous one stopped. A trailing line
/// without a newline is held back until it parses or is completed. If the
/// file shrinks it is assumed to have been rotated and is read from the
/// start again.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    description: String,
    offset: u64,
    partial: Vec<u8>,
    last_error: Option<String>,
    malformed: u64,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self {
            path,
            description,
            offset: 0,
            partial: Vec::new(),
            last_error: None,
            malformed: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines skipped because they did not parse.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    fn read_new_bytes(&mut self) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            info!(path = %self.path.display(), "input file shrank, reading from the start");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut bytes)?;
        self.offset += bytes.len() as u64;
        Ok(bytes)
    }

    fn parse_into(&mut self, line: &[u8], events: &mut Vec<InputEvent>) {
        match parse_bytes(line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => {
                self.malformed += 1;
                warn!(source = %self.description, error = %e, "skipping malformed event");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

impl EventSource for FileSource {
    fn poll(&mut self) -> Vec<InputEvent> {
        let bytes = match self.read_new_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.last_error = Some(format!("Read error: {}", e));
                return Vec::new();
            }
        };
        self.partial.extend_from_slice(&bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.parse_into(&line, &mut events);
        }

        // an unterminated last line is taken once it is complete JSON
        if let Ok(Some(event)) = parse_bytes(&self.partial) {
            events.push(event);
            self.partial.clear();
        }
        events
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn is_finished(&self) -> bool {
        false
    }
}
