//! Output stream bookkeeping
//!
//! Owns the offsets into the backend output log and is the only path by
//! which shell output reaches the terminal surface. Before the initial
//! load completes, live notifications are held and replayed afterwards.
//!
//! Two positions are kept: `stream_offset` counts rendered bytes and never
//! decreases, while `log_position` is how far into the current log epoch
//! output has been rendered. They agree until the backend truncates the
//! log; from then on fetches, snapshots and overlap trimming use
//! `log_position`.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::term::{OscCommand, TerminalSurface};
use crate::backend::{Backend, CacheSnapshot, FileEvent, FileOp, TERM_FILE_NAME};

pub struct OutputStreamManager {
    session_id: String,
    /// Bytes of the output log rendered so far; never decreases
    stream_offset: u64,
    /// Rendered prefix of the current log; restarts on truncate
    log_position: u64,
    /// Bytes rendered since the last snapshot flush
    bytes_since_cache: u64,
    loaded: bool,
    held: Vec<FileEvent>,
    /// The log restarted before load, so the cached snapshot is history
    snapshot_stale: bool,
}

impl OutputStreamManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stream_offset: 0,
            log_position: 0,
            bytes_since_cache: 0,
            loaded: false,
            held: Vec::new(),
            snapshot_stale: false,
        }
    }

    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    pub fn log_position(&self) -> u64 {
        self.log_position
    }

    pub fn bytes_since_cache(&self) -> u64 {
        self.bytes_since_cache
    }

    pub fn reset_bytes_since_cache(&mut self) {
        self.bytes_since_cache = 0;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn held_chunks(&self) -> usize {
        self.held.len()
    }

    /// Initial load: snapshot, then the log tail from the snapshot's offset,
    /// then the held notifications.
    ///
    /// Returns the OSC commands rendered while draining held notifications.
    /// Commands found in the snapshot or the tail are history and dropped.
    pub fn load(
        &mut self,
        surface: &mut dyn TerminalSurface,
        backend: &dyn Backend,
        cache_kind: &str,
    ) -> Vec<OscCommand> {
        if self.loaded {
            debug!(session = %self.session_id, "session already loaded");
            return Vec::new();
        }
        let started = Instant::now();
        let session = self.session_id.clone();

        let snapshot = if self.snapshot_stale {
            debug!(session = %session, "output log restarted, skipping snapshot");
            None
        } else {
            match backend.fetch_cache(&session, cache_kind) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(session = %session, "cache fetch failed, replaying full log: {}", e);
                    None
                }
            }
        };

        let mut replayed = 0;
        let mut cache_bytes = 0;
        if let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) {
            cache_bytes = snapshot.data.len();
            replayed += self.apply_snapshot(surface, &snapshot);
        }

        let mut tail_bytes = 0;
        match backend.fetch_file(&session, TERM_FILE_NAME, self.log_position) {
            Ok(Some(tail)) => {
                if tail.offset != self.log_position {
                    warn!(
                        session = %session,
                        requested = self.log_position,
                        got = tail.offset,
                        "output log does not start at the snapshot offset"
                    );
                    self.log_position = tail.offset;
                }
                tail_bytes = tail.data.len();
                replayed += self.render(surface, &tail.data).len();
            }
            Ok(None) => debug!(session = %session, "no output log yet"),
            Err(e) => warn!(session = %session, "output log fetch failed: {}", e),
        }

        info!(
            session = %session,
            cache_bytes,
            tail_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "terminal loaded"
        );
        if replayed > 0 {
            debug!(session = %session, replayed, "ignored OSC commands in history");
        }

        self.loaded = true;
        self.drain_held(surface)
    }

    /// Write a snapshot at its recorded dimensions and resume from its offset
    fn apply_snapshot(&mut self, surface: &mut dyn TerminalSurface, snapshot: &CacheSnapshot) -> usize {
        let live = surface.dimensions();
        let recorded = snapshot
            .meta
            .term_size
            .filter(|size| size.rows > 0 && size.cols > 0 && *size != live);

        let commands = match recorded {
            Some(size) => {
                debug!(session = %self.session_id, %size, %live, "replaying snapshot at recorded size");
                surface.resize(size);
                let commands = surface.write(snapshot.data.as_bytes());
                surface.resize(live);
                commands
            }
            None => surface.write(snapshot.data.as_bytes()),
        };
        self.log_position = snapshot.offset();
        self.stream_offset = self.stream_offset.max(snapshot.offset());
        commands.len()
    }

    fn drain_held(&mut self, surface: &mut dyn TerminalSurface) -> Vec<OscCommand> {
        self.snapshot_stale = false;
        let mut commands = Vec::new();
        for chunk in std::mem::take(&mut self.held) {
            commands.extend(self.append(surface, &chunk));
        }
        commands
    }

    /// Render the part of an append not yet rendered from this log epoch
    fn append(&mut self, surface: &mut dyn TerminalSurface, chunk: &FileEvent) -> Vec<OscCommand> {
        let end = chunk.offset + chunk.data.len() as u64;
        if end <= self.log_position {
            debug!(session = %self.session_id, offset = chunk.offset, "chunk already rendered");
            return Vec::new();
        }
        if chunk.offset > self.log_position {
            warn!(
                session = %self.session_id,
                expected = self.log_position,
                got = chunk.offset,
                "gap in output log"
            );
            self.log_position = chunk.offset;
        }
        let skip = (self.log_position - chunk.offset) as usize;
        self.render(surface, &chunk.data[skip..])
    }

    /// Process one backend notification, returning the OSC commands it rendered
    pub fn handle_event(&mut self, surface: &mut dyn TerminalSurface, event: FileEvent) -> Vec<OscCommand> {
        match event.op {
            FileOp::Truncate => {
                surface.clear();
                let dropped = self.held.len();
                self.held.clear();
                self.log_position = event.offset;
                if !self.loaded {
                    self.snapshot_stale = true;
                }
                info!(session = %self.session_id, dropped, "output log truncated");
                Vec::new()
            }
            FileOp::Append if !self.loaded => {
                self.held.push(event);
                Vec::new()
            }
            FileOp::Append => self.append(surface, &event),
        }
    }

    fn render(&mut self, surface: &mut dyn TerminalSurface, data: &[u8]) -> Vec<OscCommand> {
        if data.is_empty() {
            return Vec::new();
        }
        let commands = surface.write(data);
        let len = data.len() as u64;
        self.stream_offset += len;
        self.log_position += len;
        self.bytes_since_cache += len;
        commands
    }

    pub fn dispose(&mut self) {
        self.held.clear();
        self.snapshot_stale = false;
    }
}
