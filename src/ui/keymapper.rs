//! Key mapping for terminal input
//!
//! Two stages. [`KeybindingRouter`] intercepts editing and navigation
//! chords and turns them into the control sequences a readline-style line
//! editor understands. Keys it does not claim fall through to
//! [`KeyMapper`], which encodes them as plain VT input.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode};

use crate::core::term::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
        /// Command / Windows / Meta
        const SUPER = 0b1000;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        if mods.intersects(KeyModifiers::SUPER | KeyModifiers::META) {
            result |= Modifiers::SUPER;
        }
        result
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

/// Line-editor operations reachable through chords
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditAction {
    LineStart,
    LineEnd,
    DeleteToLineStart,
    DeleteToLineEnd,
    WordLeft,
    WordRight,
    DeleteWordBackward,
    DeleteWordForward,
    SelectLine,
}

impl EditAction {
    /// Bytes a readline/zle style editor binds to this operation
    pub fn bytes(self) -> &'static [u8] {
        match self {
            EditAction::LineStart => b"\x01",          // Ctrl+A
            EditAction::LineEnd => b"\x05",            // Ctrl+E
            EditAction::DeleteToLineStart => b"\x15",  // Ctrl+U
            EditAction::DeleteToLineEnd => b"\x0b",    // Ctrl+K
            EditAction::WordLeft => b"\x1bb",          // Alt+B
            EditAction::WordRight => b"\x1bf",         // Alt+F
            EditAction::DeleteWordBackward => b"\x17", // Ctrl+W
            EditAction::DeleteWordForward => b"\x1bd", // Alt+D
            // Line start, then Shift+End
            EditAction::SelectLine => b"\x01\x1b[1;2F",
        }
    }
}

type Chord = (KeyCode, Modifiers, EditAction);

const MACOS_CHORDS: &[Chord] = &[
    (KeyCode::Backspace, Modifiers::SUPER, EditAction::DeleteToLineStart),
    (KeyCode::Delete, Modifiers::SUPER, EditAction::DeleteToLineEnd),
    (KeyCode::Left, Modifiers::ALT, EditAction::WordLeft),
    (KeyCode::Right, Modifiers::ALT, EditAction::WordRight),
    (KeyCode::Backspace, Modifiers::ALT, EditAction::DeleteWordBackward),
    (KeyCode::Delete, Modifiers::ALT, EditAction::DeleteWordForward),
    (KeyCode::Left, Modifiers::SUPER, EditAction::LineStart),
    (KeyCode::Right, Modifiers::SUPER, EditAction::LineEnd),
    (KeyCode::Char('a'), Modifiers::SUPER, EditAction::SelectLine),
];

const PC_CHORDS: &[Chord] = &[
    (KeyCode::Backspace, Modifiers::CTRL, EditAction::DeleteWordBackward),
    (KeyCode::Delete, Modifiers::CTRL, EditAction::DeleteWordForward),
];

const UNIVERSAL_CHORDS: &[Chord] = &[
    (KeyCode::Char('a'), Modifiers::CTRL, EditAction::LineStart),
    (KeyCode::Char('e'), Modifiers::CTRL, EditAction::LineEnd),
    (KeyCode::Char('u'), Modifiers::CTRL, EditAction::DeleteToLineStart),
    (KeyCode::Char('k'), Modifiers::CTRL, EditAction::DeleteToLineEnd),
    (KeyCode::Char('w'), Modifiers::CTRL, EditAction::DeleteWordBackward),
    (KeyCode::Home, Modifiers::empty(), EditAction::LineStart),
    (KeyCode::End, Modifiers::empty(), EditAction::LineEnd),
    (KeyCode::Left, Modifiers::CTRL, EditAction::WordLeft),
    (KeyCode::Right, Modifiers::CTRL, EditAction::WordRight),
];

/// Outcome of routing one key press
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyRoute {
    /// Consumed; send the action's bytes
    Mapped(EditAction),
    /// Input-method toggle; must propagate so composition can be reset
    ImeToggle,
    Unhandled,
}

pub struct KeybindingRouter {
    platform: Platform,
}

impl KeybindingRouter {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn route(&self, event: &KeyEvent) -> KeyRoute {
        if event.kind == KeyEventKind::Release {
            return KeyRoute::Unhandled;
        }
        if is_ime_toggle(event, self.platform) {
            return KeyRoute::ImeToggle;
        }

        let mods = Modifiers::from(event.modifiers);
        let code = normalize(event.code);
        let platform_chords = match self.platform {
            Platform::MacOs => MACOS_CHORDS,
            Platform::Linux | Platform::Windows => PC_CHORDS,
        };

        platform_chords
            .iter()
            .chain(UNIVERSAL_CHORDS)
            .find(|(key, chord_mods, _)| *key == code && *chord_mods == mods)
            .map_or(KeyRoute::Unhandled, |(_, _, action)| KeyRoute::Mapped(*action))
    }
}

/// Letters compare case-insensitively; modifiers carry the shift state
fn normalize(code: KeyCode) -> KeyCode {
    match code {
        KeyCode::Char(ch) => KeyCode::Char(ch.to_ascii_lowercase()),
        other => other,
    }
}

/// Does this key switch input methods on the given platform?
pub fn is_ime_toggle(event: &KeyEvent, platform: Platform) -> bool {
    let mods = Modifiers::from(event.modifiers);
    match event.code {
        KeyCode::CapsLock => true,
        KeyCode::Char(' ') => match platform {
            Platform::MacOs => mods == Modifiers::SUPER || mods == Modifiers::CTRL,
            Platform::Linux | Platform::Windows => mods == Modifiers::SUPER,
        },
        // Alt+Shift and Ctrl+Shift switch layouts on Windows
        KeyCode::Modifier(key) if platform == Platform::Windows => {
            let shift_key = matches!(key, ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift);
            let other = mods - Modifiers::SHIFT;
            shift_key && (other == Modifiers::ALT || other == Modifiers::CTRL)
        }
        _ => false,
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to bytes for the shell
    pub fn map(event: &KeyEvent, modes: &TerminalModes) -> Option<Vec<u8>> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let mods = Modifiers::from(event.modifiers);
        // Cmd/Super chords the router did not claim belong to the host
        if mods.contains(Modifiers::SUPER) {
            return None;
        }

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => {
                if modes.linefeed_newline {
                    Some(vec![0x0D, 0x0A])
                } else {
                    Some(vec![0x0D])
                }
            }

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }

            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::arrow_key(b'A', mods, modes)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, modes)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, modes)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, modes)),

            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            let code = match ch {
                'a'..='z' => Some(ch as u8 - b'a' + 1),
                'A'..='Z' => Some(ch as u8 - b'A' + 1),
                '@' | '`' | ' ' | '2' => Some(0x00),
                '[' | '3' => Some(0x1B),
                '\\' | '4' => Some(0x1C),
                ']' | '5' => Some(0x1D),
                '^' | '~' | '6' => Some(0x1E),
                '_' | '?' | '7' => Some(0x1F),
                _ => None,
            };
            if let Some(code) = code {
                return if alt { vec![0x1B, code] } else { vec![code] };
            }
        }

        let mut buf = [0u8; 4];
        let encoded = ch.encode_utf8(&mut buf).as_bytes();
        if alt {
            let mut bytes = vec![0x1B];
            bytes.extend_from_slice(encoded);
            bytes
        } else {
            encoded.to_vec()
        }
    }

    fn arrow_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        if !mods.is_empty() {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    /// Home / End
    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// PageUp, PageDown, Insert, Delete
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        // F1-F4 use SS3 letters, the rest CSI numbers
        let ss3 = match n {
            1 => Some(b'P'),
            2 => Some(b'Q'),
            3 => Some(b'R'),
            4 => Some(b'S'),
            _ => None,
        };
        if let Some(key) = ss3 {
            return Some(if mods.is_empty() {
                vec![0x1B, b'O', key]
            } else {
                format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
            });
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_macos_chords() {
        let router = KeybindingRouter::new(Platform::MacOs);

        let cases: [(KeyCode, KeyModifiers, &[u8]); 9] = [
            (KeyCode::Backspace, KeyModifiers::SUPER, b"\x15"),
            (KeyCode::Delete, KeyModifiers::SUPER, b"\x0b"),
            (KeyCode::Left, KeyModifiers::ALT, b"\x1bb"),
            (KeyCode::Right, KeyModifiers::ALT, b"\x1bf"),
            (KeyCode::Backspace, KeyModifiers::ALT, b"\x17"),
            (KeyCode::Delete, KeyModifiers::ALT, b"\x1bd"),
            (KeyCode::Left, KeyModifiers::SUPER, b"\x01"),
            (KeyCode::Right, KeyModifiers::SUPER, b"\x05"),
            (KeyCode::Char('a'), KeyModifiers::SUPER, b"\x01\x1b[1;2F"),
        ];
        for (code, mods, bytes) in cases {
            match router.route(&key_event(code, mods)) {
                KeyRoute::Mapped(action) => assert_eq!(action.bytes(), bytes, "{:?}+{:?}", mods, code),
                other => panic!("{:?}+{:?} routed to {:?}", mods, code, other),
            }
        }
    }

    #[test]
    fn test_universal_chords_on_every_platform() {
        for platform in [Platform::MacOs, Platform::Linux, Platform::Windows] {
            let router = KeybindingRouter::new(platform);
            assert_eq!(
                router.route(&key_event(KeyCode::Char('u'), KeyModifiers::CONTROL)),
                KeyRoute::Mapped(EditAction::DeleteToLineStart)
            );
            assert_eq!(
                router.route(&key_event(KeyCode::Home, KeyModifiers::NONE)),
                KeyRoute::Mapped(EditAction::LineStart)
            );
            assert_eq!(
                router.route(&key_event(KeyCode::Right, KeyModifiers::CONTROL)),
                KeyRoute::Mapped(EditAction::WordRight)
            );
        }
    }

    #[test]
    fn test_platform_table_wins() {
        let router = KeybindingRouter::new(Platform::Linux);
        assert_eq!(
            router.route(&key_event(KeyCode::Backspace, KeyModifiers::CONTROL)),
            KeyRoute::Mapped(EditAction::DeleteWordBackward)
        );
        // macOS-only chord is plain input elsewhere
        assert_eq!(
            router.route(&key_event(KeyCode::Left, KeyModifiers::SUPER)),
            KeyRoute::Unhandled
        );
    }

    #[test]
    fn test_unmapped_keys_fall_through() {
        let router = KeybindingRouter::new(Platform::MacOs);
        assert_eq!(router.route(&key_event(KeyCode::Char('x'), KeyModifiers::NONE)), KeyRoute::Unhandled);
        assert_eq!(router.route(&key_event(KeyCode::Char('c'), KeyModifiers::CONTROL)), KeyRoute::Unhandled);
        // Extra modifiers do not match a chord
        assert_eq!(
            router.route(&key_event(KeyCode::Char('a'), KeyModifiers::CONTROL | KeyModifiers::SHIFT)),
            KeyRoute::Unhandled
        );
    }

    #[test]
    fn test_ime_toggles_are_never_consumed() {
        let mac = KeybindingRouter::new(Platform::MacOs);
        assert_eq!(mac.route(&key_event(KeyCode::CapsLock, KeyModifiers::NONE)), KeyRoute::ImeToggle);
        assert_eq!(mac.route(&key_event(KeyCode::Char(' '), KeyModifiers::SUPER)), KeyRoute::ImeToggle);
        assert_eq!(mac.route(&key_event(KeyCode::Char(' '), KeyModifiers::CONTROL)), KeyRoute::ImeToggle);

        let linux = KeybindingRouter::new(Platform::Linux);
        assert_eq!(linux.route(&key_event(KeyCode::Char(' '), KeyModifiers::CONTROL)), KeyRoute::Unhandled);

        let windows = KeybindingRouter::new(Platform::Windows);
        let alt_shift = key_event(
            KeyCode::Modifier(ModifierKeyCode::LeftShift),
            KeyModifiers::ALT | KeyModifiers::SHIFT,
        );
        assert_eq!(windows.route(&alt_shift), KeyRoute::ImeToggle);
    }

    #[test]
    fn test_char_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"a".to_vec()));

        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x03]));

        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x1B, b'x']));

        let event = key_event(KeyCode::Char('é'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_super_chords_are_not_encoded() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Char('v'), KeyModifiers::SUPER);
        assert_eq!(KeyMapper::map(&event, &modes), None);

        let event = key_event(KeyCode::Char(' '), KeyModifiers::SUPER);
        assert_eq!(KeyMapper::map(&event, &modes), None);

        let event = key_event(KeyCode::Up, KeyModifiers::SUPER | KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event, &modes), None);
    }

    #[test]
    fn test_arrow_keys() {
        let mut modes = TerminalModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[A".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[1;5A".to_vec()));

        modes.application_cursor = true;
        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1bOA".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1bOP".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[15;2~".to_vec()));

        let event = key_event(KeyCode::F(13), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), None);
    }
}
