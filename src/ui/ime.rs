//! IME composition tracking
//!
//! Follows the input method's start/update/end lifecycle so that nothing
//! typed mid-composition reaches the shell, and only the committed text
//! does, once.

use tracing::{debug, warn};

use super::input_filter::InputFilter;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CompositionState {
    #[default]
    Idle,
    /// Preedit text as last reported by the input method
    Composing(String),
}

impl CompositionState {
    pub fn is_composing(&self) -> bool {
        matches!(self, CompositionState::Composing(_))
    }

    pub fn text(&self) -> &str {
        match self {
            CompositionState::Idle => "",
            CompositionState::Composing(text) => text,
        }
    }
}

/// Why a composition was abandoned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceIdleReason {
    FocusLost,
    ImeToggle,
}

#[derive(Default)]
pub struct CompositionStateMachine {
    state: CompositionState,
}

impl CompositionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CompositionState {
        &self.state
    }

    pub fn is_composing(&self) -> bool {
        self.state.is_composing()
    }

    pub fn start(&mut self) {
        if self.state.is_composing() {
            debug!(preedit = self.state.text(), "composition restarted");
        }
        self.state = CompositionState::Composing(String::new());
    }

    /// Replace the preedit text. Updates outside a composition are ignored.
    pub fn update(&mut self, text: &str) {
        match &mut self.state {
            CompositionState::Composing(preedit) => {
                preedit.clear();
                preedit.push_str(text);
            }
            CompositionState::Idle => {
                warn!(?text, "composition update without start ignored");
            }
        }
    }

    /// Finish the composition, yielding the committed text.
    ///
    /// An end arriving after a forced reset still commits its text: the
    /// input method considers it typed, and dropping it would lose input.
    pub fn end(&mut self, text: &str) -> Option<String> {
        let was_composing = self.state.is_composing();
        self.state = CompositionState::Idle;
        if !was_composing {
            debug!(?text, "composition end without active composition");
        }
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// Abandon any composition and reset the duplicate filter, whose
    /// timing record no longer describes what the keyboard is doing.
    ///
    /// Returns whether a composition was actually abandoned.
    pub fn force_idle(&mut self, reason: ForceIdleReason, filter: &mut InputFilter) -> bool {
        let was_composing = self.state.is_composing();
        if was_composing {
            debug!(?reason, preedit = self.state.text(), "composition abandoned");
        }
        self.state = CompositionState::Idle;
        filter.reset();
        was_composing
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::InputConfig;

    #[test]
    fn test_lifecycle() {
        let mut ime = CompositionStateMachine::new();
        assert_eq!(ime.state(), &CompositionState::Idle);

        ime.start();
        assert_eq!(ime.state(), &CompositionState::Composing(String::new()));

        ime.update("ni");
        ime.update("nih");
        assert_eq!(ime.state().text(), "nih");

        assert_eq!(ime.end("你好"), Some("你好".to_string()));
        assert_eq!(ime.state(), &CompositionState::Idle);
    }

    #[test]
    fn test_update_without_start_stays_idle() {
        let mut ime = CompositionStateMachine::new();
        ime.update("x");
        assert!(!ime.is_composing());
    }

    #[test]
    fn test_empty_commit_yields_nothing() {
        let mut ime = CompositionStateMachine::new();
        ime.start();
        assert_eq!(ime.end(""), None);
        assert!(!ime.is_composing());
    }

    #[test]
    fn test_force_idle_resets_filter() {
        let mut ime = CompositionStateMachine::new();
        let mut filter = InputFilter::new(&InputConfig::default());
        filter.check("a", Instant::now(), ime.state());
        assert!(filter.last().is_some());

        ime.start();
        ime.update("k");
        assert!(ime.force_idle(ForceIdleReason::ImeToggle, &mut filter));
        assert!(!ime.is_composing());
        assert!(filter.last().is_none());
    }

    #[test]
    fn test_force_idle_when_idle_is_noop() {
        let mut ime = CompositionStateMachine::new();
        let mut filter = InputFilter::new(&InputConfig::default());
        assert!(!ime.force_idle(ForceIdleReason::FocusLost, &mut filter));
        assert!(!ime.is_composing());
    }
}
