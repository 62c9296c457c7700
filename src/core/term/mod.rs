//! Terminal surface
//!
//! The surface is the only thing that ever renders shell output. Session
//! code talks to it through [`TerminalSurface`]; [`VtSurface`] is the
//! built-in implementation (VT parser + cell grid with scrollback).

pub mod parser;
pub mod state;

use serde::{Deserialize, Serialize};

pub use parser::{OscCommand, VtParser};
pub use state::{CursorState, TerminalModes, TerminalState};

/// Terminal dimensions in character cells
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Something shell output can be rendered into
pub trait TerminalSurface {
    fn dimensions(&self) -> TermSize;

    fn resize(&mut self, size: TermSize);

    /// Render bytes, returning every OSC command completed by them, in order
    fn write(&mut self, data: &[u8]) -> Vec<OscCommand>;

    /// Blank screen and scrollback, cursor home
    fn clear(&mut self);

    /// Replayable text form of the rendered buffer
    fn serialize(&self) -> String;

    /// Input-affecting modes the output has switched on
    fn modes(&self) -> TerminalModes {
        TerminalModes::default()
    }
}

/// Built-in surface backed by [`TerminalState`]
pub struct VtSurface {
    state: TerminalState,
    parser: VtParser,
}

impl VtSurface {
    pub fn new(size: TermSize) -> Self {
        Self {
            state: TerminalState::new(size.cols, size.rows),
            parser: VtParser::new(),
        }
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn screen_lines(&self) -> Vec<String> {
        self.state.screen_lines()
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }
}

impl TerminalSurface for VtSurface {
    fn dimensions(&self) -> TermSize {
        TermSize::new(self.state.rows, self.state.cols)
    }

    fn resize(&mut self, size: TermSize) {
        self.state.resize(size.cols, size.rows);
    }

    fn write(&mut self, data: &[u8]) -> Vec<OscCommand> {
        data.iter()
            .filter_map(|b| self.parser.feed(*b, &mut self.state))
            .collect()
    }

    fn clear(&mut self) {
        self.state.clear();
    }

    fn serialize(&self) -> String {
        self.state.serialize()
    }

    fn modes(&self) -> TerminalModes {
        self.state.modes
    }
}
