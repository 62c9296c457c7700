//! Debounced resize handling
//!
//! Resize requests arrive in bursts while a window is dragged. Only the
//! last size of a burst is applied, once no request has arrived for the
//! debounce delay. The backend hears about a size only when it actually
//! changed, and the first stabilized size also triggers a one-time
//! controller resync.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::term::{TermSize, TerminalSurface};
use crate::backend::Backend;

/// Latest-wins trailing debounce
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    /// Replace the pending value and restart the delay
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// The pending value, once its delay has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if now >= *deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

/// Outcome of applying a size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub size: TermSize,
    /// The backend was told about a new size
    pub notified: bool,
    /// This was the first stabilization and a resync was requested
    pub resynced: bool,
}

pub struct ResizeCoordinator {
    session_id: String,
    debouncer: Debouncer<TermSize>,
    has_resized: bool,
}

impl ResizeCoordinator {
    pub const INITIAL_RESYNC_REASON: &'static str = "initial resize";

    pub fn new(session_id: impl Into<String>, debounce: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            debouncer: Debouncer::new(debounce),
            has_resized: false,
        }
    }

    pub fn request(&mut self, size: TermSize, now: Instant) {
        self.debouncer.push(size, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }

    /// Apply the debounced size if its delay has elapsed
    pub fn poll(
        &mut self,
        now: Instant,
        surface: &mut dyn TerminalSurface,
        backend: &dyn Backend,
    ) -> Option<ResizeOutcome> {
        let size = self.debouncer.poll(now)?;
        Some(self.apply(size, surface, backend))
    }

    /// Apply a size immediately, bypassing the debounce
    pub fn apply(
        &mut self,
        size: TermSize,
        surface: &mut dyn TerminalSurface,
        backend: &dyn Backend,
    ) -> ResizeOutcome {
        let session = self.session_id.as_str();
        if size.rows == 0 || size.cols == 0 {
            warn!(session, %size, "ignoring empty terminal size");
            return ResizeOutcome {
                size: surface.dimensions(),
                notified: false,
                resynced: false,
            };
        }

        let old = surface.dimensions();
        if old != size {
            surface.resize(size);
        }
        let size = surface.dimensions();
        let notified = old != size;
        if notified {
            backend.set_term_size(session, size);
        }
        debug!(session, %size, %old, has_resized = self.has_resized, "resize");

        let resynced = !self.has_resized;
        if resynced {
            self.has_resized = true;
            self.resync(size, backend, Self::INITIAL_RESYNC_REASON);
        }
        ResizeOutcome {
            size,
            notified,
            resynced,
        }
    }

    fn resync(&self, size: TermSize, backend: &dyn Backend, reason: &str) {
        let session = self.session_id.as_str();
        debug!(session, reason, %size, "resync controller");
        if let Err(e) = backend.resync_controller(session, size) {
            warn!(session, reason, "controller resync failed: {}", e);
        }
    }
}
