//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and updates terminal state. OSC commands
//! other than window titles are handed back to the caller untouched.

use tracing::{debug, warn};

use super::state::TerminalState;

/// OSC payloads longer than this are dropped
const MAX_OSC_LEN: usize = 1 << 20;

/// A complete OSC command: `ESC ] code ; payload (BEL | ST)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OscCommand {
    pub code: u16,
    pub payload: String,
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc_bytes: Vec<u8>,
    osc_overflow: bool,
    /// Partial UTF-8 sequence carried across `feed` calls
    utf8: Vec<u8>,
    utf8_len: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    EscapeInOsc, // ESC received within OSC, waiting for backslash
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_bytes: Vec::new(),
            osc_overflow: false,
            utf8: Vec::with_capacity(4),
            utf8_len: 0,
        }
    }

    /// Feed a single byte to the parser
    pub fn feed(&mut self, byte: u8, state: &mut TerminalState) -> Option<OscCommand> {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::EscapeInOsc);

        // Handle C0 controls anywhere (except in OSC-related states)
        if byte < 0x20 && !in_osc {
            self.flush_partial_utf8(state);
            match byte {
                0x1B => self.enter_escape(),
                0x08 => state.backspace(),
                0x09 => state.horizontal_tab(),
                0x0A..=0x0C => {
                    state.linefeed();
                    if state.modes.linefeed_newline {
                        state.carriage_return();
                    }
                }
                0x0D => state.carriage_return(),
                0x18 | 0x1A => self.state = ParserState::Ground,
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => {
                self.ground(byte, state);
                None
            }
            ParserState::Escape => {
                self.escape(byte, state);
                None
            }
            ParserState::EscapeIntermediate => {
                self.escape_intermediate(byte);
                None
            }
            ParserState::CsiEntry => {
                self.csi_entry(byte, state);
                None
            }
            ParserState::CsiParam => {
                self.csi_param(byte, state);
                None
            }
            ParserState::CsiIntermediate => {
                self.csi_intermediate(byte, state);
                None
            }
            ParserState::OscString => self.osc_string_state(byte, state),
            ParserState::EscapeInOsc => self.escape_in_osc(byte, state),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, state: &mut TerminalState) {
        if byte < 0x80 {
            self.flush_partial_utf8(state);
            if byte != 0x7F {
                state.put_char(byte as char);
            }
            return;
        }

        if self.utf8.is_empty() || byte & 0xC0 != 0x80 {
            self.flush_partial_utf8(state);
            self.utf8_len = match byte {
                b if b & 0xE0 == 0xC0 => 2,
                b if b & 0xF0 == 0xE0 => 3,
                b if b & 0xF8 == 0xF0 => 4,
                _ => {
                    state.put_char(char::REPLACEMENT_CHARACTER);
                    return;
                }
            };
        }

        self.utf8.push(byte);
        if self.utf8.len() == self.utf8_len {
            match std::str::from_utf8(&self.utf8) {
                Ok(s) => s.chars().for_each(|ch| state.put_char(ch)),
                Err(_) => state.put_char(char::REPLACEMENT_CHARACTER),
            }
            self.utf8.clear();
        }
    }

    /// An interrupted multi-byte sequence renders as one replacement char
    fn flush_partial_utf8(&mut self, state: &mut TerminalState) {
        if !self.utf8.is_empty() {
            self.utf8.clear();
            state.put_char(char::REPLACEMENT_CHARACTER);
        }
    }

    fn escape(&mut self, byte: u8, state: &mut TerminalState) {
        self.state = ParserState::Ground;
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc_bytes.clear();
                self.osc_overflow = false;
            }
            b'7' => state.save_cursor(),
            b'8' => state.restore_cursor(),
            b'D' => state.linefeed(),
            b'E' => {
                state.carriage_return();
                state.linefeed();
            }
            b'M' => state.reverse_index(),
            b'c' => {
                // RIS - Full reset
                let (cols, rows) = (state.cols, state.rows);
                *state = TerminalState::new(cols, rows);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {}
        }
    }

    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            // Charset selections and the like; ignored
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_entry(&mut self, byte: u8, state: &mut TerminalState) {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => self.intermediates.push(byte),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => self.execute_csi(byte, state),
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_param(&mut self, byte: u8, state: &mut TerminalState) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.execute_csi(byte, state);
            }
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_intermediate(&mut self, byte: u8, state: &mut TerminalState) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => self.execute_csi(byte, state),
            _ => self.state = ParserState::Ground,
        }
    }

    fn osc_string_state(&mut self, byte: u8, state: &mut TerminalState) -> Option<OscCommand> {
        match byte {
            // BEL terminates OSC. 8-bit ST is not honoured: 0x9C is a
            // valid UTF-8 continuation byte inside the payload.
            0x07 => {
                self.state = ParserState::Ground;
                self.execute_osc(state)
            }
            // Could be ST (ESC \)
            0x1B => {
                self.state = ParserState::EscapeInOsc;
                None
            }
            _ => {
                if self.osc_bytes.len() < MAX_OSC_LEN {
                    self.osc_bytes.push(byte);
                } else {
                    self.osc_overflow = true;
                }
                None
            }
        }
    }

    /// Handle ESC received within OSC sequence
    fn escape_in_osc(&mut self, byte: u8, state: &mut TerminalState) -> Option<OscCommand> {
        let command = self.execute_osc(state);
        if byte == b'\\' {
            self.state = ParserState::Ground;
        } else {
            // Not ST: the ESC starts a new sequence
            self.enter_escape();
            self.escape(byte, state);
        }
        command
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) {
        self.state = ParserState::Ground;

        let is_private = self.intermediates.contains(&b'?');
        if !is_private && !self.intermediates.is_empty() {
            // DECSCUSR, secondary DA and friends carry no screen effect here
            return;
        }
        let first = self.params.first().copied();
        let count = first.unwrap_or(1).max(1);

        match (is_private, final_byte) {
            (false, b'A') => state.cursor_up(count),
            (false, b'B') | (false, b'e') => state.cursor_down(count),
            (false, b'C') | (false, b'a') => state.cursor_forward(count),
            (false, b'D') => state.cursor_backward(count),
            (false, b'E') => {
                state.cursor_down(count);
                state.carriage_return();
            }
            (false, b'F') => {
                state.cursor_up(count);
                state.carriage_return();
            }
            (false, b'G') | (false, b'`') => state.cursor_column(first.unwrap_or(1)),
            (false, b'H') | (false, b'f') => {
                let col = self.params.get(1).copied().unwrap_or(1);
                state.cursor_position(first.unwrap_or(1), col);
            }
            (false, b'd') => state.cursor_row(first.unwrap_or(1)),
            (false, b'J') => state.erase_in_display(first.unwrap_or(0)),
            (false, b'K') => state.erase_in_line(first.unwrap_or(0)),
            (false, b'L') => state.insert_lines(count),
            (false, b'M') => state.delete_lines(count),
            (false, b'@') => state.insert_chars(count),
            (false, b'P') => state.delete_chars(count),
            (false, b'X') => state.erase_chars(count),
            (false, b'S') => state.scroll_up(count),
            (false, b'T') => state.scroll_down(count),
            (false, b'r') => {
                let bottom = self.params.get(1).copied().unwrap_or(0);
                state.set_scroll_region(first.unwrap_or(1), bottom);
            }
            (false, b's') => state.save_cursor(),
            (false, b'u') => state.restore_cursor(),
            (false, b'h') | (false, b'l') => {
                let enable = final_byte == b'h';
                if self.params.contains(&20) {
                    state.modes.linefeed_newline = enable;
                }
            }
            (true, b'h') | (true, b'l') => {
                let enable = final_byte == b'h';
                for &p in &self.params {
                    state.set_private_mode(p, enable);
                }
            }
            // SGR, DSR, DA: accepted, no screen effect
            (_, b'm') | (_, b'n') | (_, b'c') => {}
            _ => {
                debug!(
                    "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates, self.params, final_byte as char
                );
            }
        }
    }

    fn execute_osc(&mut self, state: &mut TerminalState) -> Option<OscCommand> {
        if self.osc_overflow {
            warn!("dropping oversized OSC sequence ({} bytes kept)", self.osc_bytes.len());
            self.osc_bytes.clear();
            self.osc_overflow = false;
            return None;
        }

        let raw = String::from_utf8_lossy(&self.osc_bytes).into_owned();
        self.osc_bytes.clear();

        // Parse OSC: "code;text"
        let (code, text) = match raw.split_once(';') {
            Some((code, text)) => (code, text),
            None => (raw.as_str(), ""),
        };
        let Ok(code) = code.parse::<u16>() else {
            debug!("ignoring OSC with non-numeric code: {:?}", raw);
            return None;
        };

        match code {
            0 | 2 => {
                state.title = text.to_string();
                None
            }
            1 => None,
            _ => Some(OscCommand {
                code,
                payload: text.to_string(),
            }),
        }
    }
}
