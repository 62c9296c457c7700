//! Duplicate input suppression
//!
//! Input-method toggles and some keyboard layers emit a second, identical
//! key event right after a composition ends or after a modifier-based
//! toggle. Nothing in the event itself marks it as spurious, so this
//! filter tells "IME duplicate" from "user repeated the key" by timing and
//! composition state alone. It is best-effort: a deliberate double tap
//! faster than the windows below is dropped, and a duplicate slower than
//! them gets through.

use std::time::{Duration, Instant};

use tracing::debug;

use super::ime::CompositionState;
use crate::config::InputConfig;

/// Last text forwarded to the shell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInput {
    pub text: String,
    pub at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    Forward,
    /// Intermediate composition text; only the committed text is sent
    DropComposing,
    DropDuplicate,
}

impl FilterDecision {
    pub fn is_forward(self) -> bool {
        self == FilterDecision::Forward
    }
}

pub struct InputFilter {
    enabled: bool,
    short_window: Duration,
    alnum_window: Duration,
    horizon: Duration,
    last: Option<PendingInput>,
}

impl InputFilter {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            enabled: config.filter_enabled,
            short_window: config.short_window(),
            alnum_window: config.alnum_window(),
            horizon: config.horizon(),
            last: None,
        }
    }

    /// Decide whether `text` goes to the shell, recording it if it does.
    ///
    /// Rules, first match wins:
    /// 1. composing: drop (even with the filter disabled)
    /// 2. same as the last forwarded text, within the short window, or
    ///    within the alphanumeric window for a single ASCII alphanumeric: drop
    /// 3. forward and remember
    pub fn check(&mut self, text: &str, now: Instant, composition: &CompositionState) -> FilterDecision {
        if composition.is_composing() {
            return FilterDecision::DropComposing;
        }
        if !self.enabled {
            return FilterDecision::Forward;
        }

        if let Some(last) = &self.last {
            let elapsed = now.saturating_duration_since(last.at);
            if elapsed >= self.horizon {
                self.last = None;
            } else if last.text == text {
                if elapsed < self.short_window {
                    debug!(?text, ?elapsed, "dropping duplicate input");
                    return FilterDecision::DropDuplicate;
                }
                if is_single_alphanumeric(text) && elapsed < self.alnum_window {
                    debug!(?text, ?elapsed, "dropping duplicate alphanumeric input");
                    return FilterDecision::DropDuplicate;
                }
            }
        }

        self.last = Some(PendingInput {
            text: text.to_string(),
            at: now,
        });
        FilterDecision::Forward
    }

    /// Forget the last forwarded text
    pub fn reset(&mut self) {
        if self.last.take().is_some() {
            debug!("input filter reset");
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last(&self) -> Option<&PendingInput> {
        self.last.as_ref()
    }
}

fn is_single_alphanumeric(text: &str) -> bool {
    let mut chars = text.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> InputFilter {
        InputFilter::new(&InputConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_fast_repeat_of_letter_is_dropped() {
        let mut f = filter();
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        assert_eq!(f.check("a", t0, &idle), FilterDecision::Forward);
        assert_eq!(f.check("a", t0 + ms(40), &idle), FilterDecision::DropDuplicate);
    }

    #[test]
    fn test_slow_repeat_of_letter_is_forwarded() {
        let mut f = filter();
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        assert_eq!(f.check("a", t0, &idle), FilterDecision::Forward);
        assert_eq!(f.check("a", t0 + ms(600), &idle), FilterDecision::Forward);
    }

    #[test]
    fn test_alnum_window_only_applies_to_single_alphanumerics() {
        let mut f = filter();
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        assert!(f.check("-", t0, &idle).is_forward());
        assert!(f.check("-", t0 + ms(200), &idle).is_forward());

        assert!(f.check("你好", t0 + ms(300), &idle).is_forward());
        assert_eq!(f.check("你好", t0 + ms(320), &idle), FilterDecision::DropDuplicate);
        assert!(f.check("你好", t0 + ms(400), &idle).is_forward());

        assert!(f.check("7", t0 + ms(500), &idle).is_forward());
        assert_eq!(f.check("7", t0 + ms(900), &idle), FilterDecision::DropDuplicate);
    }

    #[test]
    fn test_dropped_input_does_not_refresh_record() {
        let mut f = filter();
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        f.check("a", t0, &idle);
        f.check("a", t0 + ms(400), &idle);
        assert_eq!(f.last().unwrap().at, t0);
        assert!(f.check("a", t0 + ms(510), &idle).is_forward());
    }

    #[test]
    fn test_composing_always_drops() {
        let mut f = filter();
        f.set_enabled(false);
        let composing = CompositionState::Composing("ni".to_string());
        assert_eq!(f.check("n", Instant::now(), &composing), FilterDecision::DropComposing);
    }

    #[test]
    fn test_disabled_filter_forwards_duplicates() {
        let mut f = filter();
        f.set_enabled(false);
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        assert!(f.check("a", t0, &idle).is_forward());
        assert!(f.check("a", t0 + ms(1), &idle).is_forward());
    }

    #[test]
    fn test_reset_forgets_record() {
        let mut f = filter();
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        f.check("a", t0, &idle);
        f.reset();
        assert!(f.check("a", t0 + ms(10), &idle).is_forward());
    }

    #[test]
    fn test_record_expires_after_horizon() {
        let mut f = InputFilter::new(&InputConfig {
            dedup_alnum_window_ms: 5000,
            ..InputConfig::default()
        });
        let t0 = Instant::now();
        let idle = CompositionState::Idle;

        f.check("a", t0, &idle);
        assert!(f.check("a", t0 + ms(1500), &idle).is_forward());
    }
}
