//! Session controller
//!
//! Wires one terminal surface to its backend: output notifications flow
//! through [`OutputStreamManager`] into the surface, keyboard and IME input
//! flows through the keybinding router, the composition machine and the
//! duplicate filter to the shell, and the idle cache and resize debounce
//! run off [`SessionController::poll_timers`].
//!
//! Nothing here reads the clock or blocks: the host passes `now` in and
//! calls [`SessionController::next_deadline`] to know when to poll again.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use crossterm::event::{KeyEvent, KeyEventKind};
use tracing::{debug, info, warn};

use super::cache::SessionCache;
use super::osc::EscapeSequenceRouter;
use super::output::OutputStreamManager;
use super::resize::{ResizeCoordinator, ResizeOutcome};
use super::term::{OscCommand, TermSize, TerminalModes, TerminalSurface};
use crate::backend::{Backend, FileEvent, SessionId};
use crate::config::Config;
use crate::ui::{
    CompositionState, CompositionStateMachine, ForceIdleReason, InputFilter, KeyMapper, KeyRoute,
    KeybindingRouter,
};

/// Receives text typed into this session so it can be mirrored elsewhere
pub type MultiInputHandler = Box<dyn FnMut(&str)>;

/// Snapshot of a session's bookkeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub loaded: bool,
    pub disposed: bool,
    pub stream_offset: u64,
    pub log_position: u64,
    pub bytes_since_cache: u64,
    pub held_chunks: usize,
    /// `None` once the surface has been released
    pub size: Option<TermSize>,
    pub composing: bool,
}

pub struct SessionController<S: TerminalSurface> {
    id: SessionId,
    surface: Option<S>,
    backend: Box<dyn Backend>,
    events: Option<Receiver<FileEvent>>,

    output: OutputStreamManager,
    cache: SessionCache,
    resize: ResizeCoordinator,
    osc: EscapeSequenceRouter,

    ime: CompositionStateMachine,
    filter: InputFilter,
    keys: KeybindingRouter,

    multi_input: Option<MultiInputHandler>,
    paste_window: Duration,
    paste_until: Option<Instant>,
    disposed: bool,
}

impl<S: TerminalSurface> SessionController<S> {
    /// Create a session and subscribe to its output notifications.
    /// Nothing is rendered until [`load`](Self::load).
    pub fn new(id: impl Into<SessionId>, surface: S, backend: Box<dyn Backend>, config: &Config) -> Self {
        let id = id.into();
        let events = backend.subscribe(&id);
        debug!(session = %id, size = %surface.dimensions(), "session created");

        Self {
            output: OutputStreamManager::new(id.clone()),
            cache: SessionCache::new(id.clone(), &config.output),
            resize: ResizeCoordinator::new(id.clone(), config.resize.debounce()),
            osc: EscapeSequenceRouter::new(id.clone()),
            ime: CompositionStateMachine::new(),
            filter: InputFilter::new(&config.input),
            keys: KeybindingRouter::new(config.platform.resolve()),
            multi_input: None,
            paste_window: config.input.paste_window(),
            paste_until: None,
            disposed: false,
            surface: Some(surface),
            events: Some(events),
            backend,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.output.is_loaded()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn composition_state(&self) -> &CompositionState {
        self.ime.state()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            loaded: self.output.is_loaded(),
            disposed: self.disposed,
            stream_offset: self.output.stream_offset(),
            log_position: self.output.log_position(),
            bytes_since_cache: self.output.bytes_since_cache(),
            held_chunks: self.output.held_chunks(),
            size: self.surface.as_ref().map(|s| s.dimensions()),
            composing: self.ime.is_composing(),
        }
    }

    /// Render the cached snapshot and log tail, then everything that
    /// arrived meanwhile, and start the idle cache timer
    pub fn load(&mut self, now: Instant) {
        if self.disposed {
            return;
        }
        // Pull queued notifications first so overlap with the tail is trimmed
        self.process_backend_events();

        if self.output.is_loaded() {
            return;
        }
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let commands = self.output.load(surface, self.backend.as_ref(), self.cache.kind());
        self.osc.dispatch(&commands, true, self.backend.as_ref());
        self.cache.start(now);
    }

    /// Drain backend notifications in arrival order. Returns how many were
    /// processed.
    pub fn process_backend_events(&mut self) -> usize {
        let (Some(surface), Some(events)) = (self.surface.as_mut(), self.events.as_ref()) else {
            return 0;
        };

        let mut processed = 0;
        let mut disconnected = false;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    let commands: Vec<OscCommand> = self.output.handle_event(&mut *surface, event);
                    if !commands.is_empty() {
                        self.osc
                            .dispatch(&commands, self.output.is_loaded(), self.backend.as_ref());
                    }
                    processed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if disconnected {
            warn!(session = %self.id, "output notifications closed");
            self.events = None;
        }
        processed
    }

    /// Persist a snapshot now, whatever the byte threshold
    pub fn flush_cache(&mut self) -> bool {
        match self.surface.as_ref() {
            Some(surface) => self
                .cache
                .flush(&mut self.output, surface, self.backend.as_ref(), true),
            None => false,
        }
    }

    /// Run every timer that is due
    pub fn poll_timers(&mut self, now: Instant) {
        if self.paste_until.is_some_and(|until| now >= until) {
            self.paste_until = None;
        }
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        self.resize.poll(now, &mut *surface, self.backend.as_ref());
        self.cache
            .poll(now, &mut self.output, &*surface, self.backend.as_ref());
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.resize.next_deadline(), self.cache.next_deadline(), self.paste_until]
            .into_iter()
            .flatten()
            .min()
    }

    /// Debounced resize request
    pub fn resize(&mut self, size: TermSize, now: Instant) {
        if self.disposed {
            return;
        }
        self.resize.request(size, now);
    }

    /// Apply a size immediately, as on first layout
    pub fn fit(&mut self, size: TermSize) -> Option<ResizeOutcome> {
        let surface = self.surface.as_mut()?;
        Some(self.resize.apply(size, surface, self.backend.as_ref()))
    }

    /// Send bytes to the shell as-is. Nothing is sent mid-composition.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.disposed || data.is_empty() {
            return false;
        }
        if self.ime.is_composing() {
            debug!(session = %self.id, "write dropped during composition");
            return false;
        }
        self.send(data)
    }

    /// A key press from the surface. Returns whether anything was sent.
    pub fn handle_key(&mut self, event: &KeyEvent, now: Instant) -> bool {
        if self.disposed || event.kind == KeyEventKind::Release {
            return false;
        }

        match self.keys.route(event) {
            // The toggle only switches the input method; nothing is typed
            KeyRoute::ImeToggle => {
                self.ime.force_idle(ForceIdleReason::ImeToggle, &mut self.filter);
                return false;
            }
            KeyRoute::Mapped(action) => {
                if self.ime.is_composing() || !self.output.is_loaded() {
                    return false;
                }
                debug!(session = %self.id, ?action, "keybinding");
                return self.send(action.bytes());
            }
            KeyRoute::Unhandled => {}
        }

        // Keys typed mid-composition belong to the input method
        if self.ime.is_composing() {
            return false;
        }
        let modes = self.modes();
        let Some(bytes) = KeyMapper::map(event, &modes) else {
            return false;
        };
        match String::from_utf8(bytes) {
            Ok(text) => {
                let sent = self.submit(&text, now);
                if sent {
                    self.mirror(&text);
                }
                sent
            }
            // Meta-prefixed Latin-1 and the like: no text to filter
            Err(e) => self.output.is_loaded() && self.send(e.as_bytes()),
        }
    }

    /// Text from the surface (typing without key events, paste)
    pub fn handle_data(&mut self, data: &str, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        let sent = self.submit(data, now);
        if sent && self.paste_until.is_some_and(|until| now < until) {
            self.paste_until = None;
            self.mirror(data);
        }
        sent
    }

    /// A paste: the pasted text is also offered to the multi-input handler
    pub fn handle_paste(&mut self, data: &str, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        self.paste_until = Some(now + self.paste_window);
        let sent = self.handle_data(data, now);
        if !sent {
            self.paste_until = None;
        }
        sent
    }

    pub fn composition_start(&mut self) {
        if !self.disposed {
            self.ime.start();
        }
    }

    pub fn composition_update(&mut self, text: &str) {
        if !self.disposed {
            self.ime.update(text);
        }
    }

    /// Finish a composition, sending the committed text once
    pub fn composition_end(&mut self, text: &str, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        match self.ime.end(text) {
            Some(committed) => self.submit(&committed, now),
            None => false,
        }
    }

    pub fn focus_lost(&mut self) {
        if !self.disposed {
            self.ime.force_idle(ForceIdleReason::FocusLost, &mut self.filter);
        }
    }

    pub fn set_input_filter_enabled(&mut self, enabled: bool) {
        self.filter.set_enabled(enabled);
        info!(session = %self.id, enabled, "input filter toggled");
    }

    pub fn set_multi_input_handler(&mut self, handler: Option<MultiInputHandler>) {
        self.multi_input = handler;
    }

    fn modes(&self) -> TerminalModes {
        self.surface
            .as_ref()
            .map_or_else(TerminalModes::default, |s| s.modes())
    }

    /// Filter then send; input before load is ignored
    fn submit(&mut self, text: &str, now: Instant) -> bool {
        if text.is_empty() {
            return false;
        }
        if !self.output.is_loaded() {
            debug!(session = %self.id, "input before load ignored");
            return false;
        }
        let decision = self.filter.check(text, now, self.ime.state());
        if !decision.is_forward() {
            debug!(session = %self.id, ?decision, "input filtered");
            return false;
        }
        self.send(text.as_bytes())
    }

    fn send(&self, data: &[u8]) -> bool {
        match self.backend.send_input(&self.id, data) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, "sending input failed: {}", e);
                false
            }
        }
    }

    fn mirror(&mut self, text: &str) {
        if let Some(handler) = self.multi_input.as_mut() {
            handler(text);
        }
    }

    /// Stop timers, unsubscribe, release the surface and reset input
    /// handling. Every later call is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.cache.cancel();
        self.resize.cancel();
        self.paste_until = None;
        self.events = None;
        self.surface = None;
        self.output.dispose();
        self.ime.force_idle(ForceIdleReason::FocusLost, &mut self.filter);
        self.multi_input = None;
        info!(session = %self.id, "session disposed");
    }
}

impl<S: TerminalSurface> Drop for SessionController<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
