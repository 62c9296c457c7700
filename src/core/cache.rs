//! Snapshot cache flushing
//!
//! On a recurring idle tick, once enough output has been rendered since the
//! last flush, the surface is serialized and persisted together with the
//! log position it covers. Reloading then costs the snapshot plus the log
//! tail written since, instead of the whole history.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::output::OutputStreamManager;
use super::term::TerminalSurface;
use crate::backend::{Backend, CacheSnapshot};
use crate::config::OutputConfig;

pub struct SessionCache {
    session_id: String,
    kind: String,
    min_bytes: u64,
    interval: Duration,
    next_tick: Option<Instant>,
}

impl SessionCache {
    pub fn new(session_id: impl Into<String>, config: &OutputConfig) -> Self {
        Self {
            session_id: session_id.into(),
            kind: config.cache_kind.clone(),
            min_bytes: config.cache_min_bytes,
            interval: config.idle_interval(),
            next_tick: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Arm the idle timer
    pub fn start(&mut self, now: Instant) {
        self.next_tick = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_tick = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Run the idle tick if due, rescheduling it. Returns whether a
    /// snapshot was attempted.
    pub fn poll(
        &mut self,
        now: Instant,
        output: &mut OutputStreamManager,
        surface: &dyn TerminalSurface,
        backend: &dyn Backend,
    ) -> bool {
        match self.next_tick {
            Some(deadline) if now >= deadline => {
                self.next_tick = Some(now + self.interval);
                self.flush(output, surface, backend, false)
            }
            _ => false,
        }
    }

    /// Persist a snapshot if enough output accumulated (or `force`).
    ///
    /// The byte counter is reset whether or not the save succeeds, so a
    /// failing store is not hammered on every tick.
    pub fn flush(
        &self,
        output: &mut OutputStreamManager,
        surface: &dyn TerminalSurface,
        backend: &dyn Backend,
        force: bool,
    ) -> bool {
        if !output.is_loaded() {
            return false;
        }
        let pending = output.bytes_since_cache();
        if pending < self.min_bytes && !(force && pending > 0) {
            return false;
        }

        let size = surface.dimensions();
        let offset = output.log_position();
        let snapshot = CacheSnapshot::new(surface.serialize(), offset, size);
        let serialized = snapshot.data.len();
        match backend.save_cache(&self.session_id, &self.kind, snapshot) {
            Ok(()) => debug!(
                session = %self.session_id,
                pending,
                serialized,
                offset,
                %size,
                "saved terminal snapshot"
            ),
            Err(e) => warn!(session = %self.session_id, "saving terminal snapshot failed: {}", e),
        }
        output.reset_bytes_since_cache();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::Operation;
    use crate::backend::{FileEvent, MemoryBackend};
    use crate::core::term::{TermSize, VtSurface};

    const SESSION: &str = "b1";

    fn config(min_bytes: u64) -> OutputConfig {
        OutputConfig {
            cache_min_bytes: min_bytes,
            ..OutputConfig::default()
        }
    }

    fn loaded(backend: &MemoryBackend, surface: &mut VtSurface, data: &[u8]) -> OutputStreamManager {
        let mut output = OutputStreamManager::new(SESSION);
        output.load(surface, backend, "full");
        output.handle_event(surface, FileEvent::append(0, data));
        output
    }

    #[test]
    fn test_flush_waits_for_idle_tick_and_threshold() {
        let backend = MemoryBackend::new();
        let mut surface = VtSurface::new(TermSize::new(24, 80));
        let mut output = loaded(&backend, &mut surface, b"0123456789");
        let mut cache = SessionCache::new(SESSION, &config(10));
        let t0 = Instant::now();
        cache.start(t0);

        assert!(!cache.poll(t0 + Duration::from_secs(4), &mut output, &surface, &backend));
        assert!(cache.poll(t0 + Duration::from_secs(5), &mut output, &surface, &backend));

        let snapshot = backend.cache(SESSION, "full").unwrap();
        assert_eq!(snapshot.offset(), 10);
        assert_eq!(snapshot.meta.term_size, Some(TermSize::new(24, 80)));
        assert!(snapshot.data.starts_with("0123456789"));
        assert_eq!(output.bytes_since_cache(), 0);
        assert_eq!(cache.next_deadline(), Some(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_below_threshold_keeps_counting() {
        let backend = MemoryBackend::new();
        let mut surface = VtSurface::new(TermSize::new(24, 80));
        let mut output = loaded(&backend, &mut surface, b"tiny");
        let mut cache = SessionCache::new(SESSION, &OutputConfig::default());
        let t0 = Instant::now();
        cache.start(t0);

        assert!(!cache.poll(t0 + Duration::from_secs(5), &mut output, &surface, &backend));
        assert_eq!(output.bytes_since_cache(), 4);
        assert_eq!(backend.save_attempts(), 0);
    }

    #[test]
    fn test_failed_save_still_resets_counter() {
        let backend = MemoryBackend::new();
        backend.fail(Operation::SaveCache);
        let mut surface = VtSurface::new(TermSize::new(24, 80));
        let mut output = loaded(&backend, &mut surface, b"0123456789");
        let cache = SessionCache::new(SESSION, &config(1));

        assert!(cache.flush(&mut output, &surface, &backend, false));
        assert_eq!(backend.save_attempts(), 1);
        assert_eq!(output.bytes_since_cache(), 0);
        assert!(backend.cache(SESSION, "full").is_none());
    }

    #[test]
    fn test_forced_flush_ignores_threshold() {
        let backend = MemoryBackend::new();
        let mut surface = VtSurface::new(TermSize::new(24, 80));
        let mut output = loaded(&backend, &mut surface, b"tiny");
        let cache = SessionCache::new(SESSION, &OutputConfig::default());

        assert!(cache.flush(&mut output, &surface, &backend, true));
        assert!(backend.cache(SESSION, "full").is_some());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let backend = MemoryBackend::new();
        let mut surface = VtSurface::new(TermSize::new(24, 80));
        let mut output = loaded(&backend, &mut surface, b"0123456789");
        let mut cache = SessionCache::new(SESSION, &config(1));
        let t0 = Instant::now();
        cache.start(t0);
        cache.cancel();

        assert!(!cache.poll(t0 + Duration::from_secs(60), &mut output, &surface, &backend));
        assert_eq!(backend.save_attempts(), 0);
    }
}
