//! Terminal screen state
//!
//! Cell grid, cursor and scrollback backing the built-in terminal surface.

use std::collections::VecDeque;

use unicode_width::UnicodeWidthChar;

/// Maximum number of lines kept above the visible screen
const SCROLLBACK_LIMIT: usize = 10_000;

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    lines: Vec<Row>,
    scrollback: VecDeque<Row>,
    cursor: CursorState,
    saved_cursor: Option<CursorState>,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    scroll_region: (u16, u16),
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            lines: (0..rows).map(|_| Row::new(cols)).collect(),
            scrollback: VecDeque::new(),
            cursor: CursorState::default(),
            saved_cursor: None,
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
        }
    }

    pub fn cursor(&self) -> CursorState {
        self.cursor
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Text of every visible row, trailing blanks trimmed
    pub fn screen_lines(&self) -> Vec<String> {
        self.lines.iter().map(Row::text).collect()
    }

    /// Text of every scrollback row, oldest first
    pub fn scrollback_lines(&self) -> Vec<String> {
        self.scrollback.iter().map(Row::text).collect()
    }

    /// Resize the terminal.
    ///
    /// Rows are anchored at the cursor: shrinking pushes lines above the
    /// cursor into scrollback, growing pulls them back. Columns are
    /// truncated or padded without reflow.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        if rows < self.rows {
            let overflow = (self.cursor.row + 1).saturating_sub(rows);
            for _ in 0..overflow {
                let row = self.lines.remove(0);
                self.push_to_scrollback(row);
            }
            self.cursor.row -= overflow;
            self.lines.truncate(rows as usize);
        } else if rows > self.rows {
            let grow = (rows - self.rows) as usize;
            let pulled = grow.min(self.scrollback.len());
            for _ in 0..pulled {
                if let Some(row) = self.scrollback.pop_back() {
                    self.lines.insert(0, row);
                }
            }
            self.cursor.row += pulled as u16;
            while self.lines.len() < rows as usize {
                self.lines.push(Row::new(self.cols));
            }
        }

        // Rows pulled back from scrollback may carry an older width
        for row in self.lines.iter_mut() {
            row.resize(cols);
        }

        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);
        self.cursor.col = self.cursor.col.min(cols - 1);
        self.cursor.row = self.cursor.row.min(rows - 1);
        self.cursor.wrap_pending = false;
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining character - append to previous cell
            self.append_to_previous_cell(ch);
            return;
        }

        if self.cursor.wrap_pending {
            self.wrap_line();
        }

        // A wide character never straddles the right margin
        if width == 2 && self.cols > 1 && self.cursor.col + 1 >= self.cols && self.modes.auto_wrap {
            self.wrap_line();
        }

        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;
        let cols = self.cols as usize;

        self.handle_wide_char_overwrite(row, col);

        let line = &mut self.lines[row];
        line.cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
        };
        if width == 2 && col + 1 < cols {
            line.cells[col + 1] = Cell::continuation();
        }

        let next = self.cursor.col.saturating_add(width);
        if next >= self.cols {
            self.cursor.col = self.cols - 1;
            self.cursor.wrap_pending = self.modes.auto_wrap;
        } else {
            self.cursor.col = next;
        }
    }

    fn wrap_line(&mut self) {
        self.cursor.wrap_pending = false;
        if !self.modes.auto_wrap {
            return;
        }
        let row = self.cursor.row as usize;
        self.lines[row].wrapped = true;
        self.cursor.col = 0;
        self.linefeed();
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let row = self.cursor.row as usize;
        let mut col = self.cursor.col as usize;
        if self.cursor.wrap_pending {
            col += 1;
        }
        let cells = &mut self.lines[row].cells;
        while col > 0 {
            col -= 1;
            if !cells[col].is_continuation() {
                cells[col].grapheme.push(ch);
                return;
            }
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let cells = &mut self.lines[row].cells;

        // Overwriting the right half of a wide char
        if col > 0 && cells[col].is_continuation() {
            cells[col - 1] = Cell::default();
        }

        // Overwriting the left half of a wide char
        if cells[col].width == 2 && col + 1 < cells.len() {
            cells[col + 1] = Cell::default();
        }
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.cursor.wrap_pending = false;
    }

    /// Line feed - move cursor down, scroll if needed
    pub fn linefeed(&mut self) {
        self.cursor.wrap_pending = false;
        if self.cursor.row == self.scroll_region.1 {
            self.scroll_up(1);
        } else if self.cursor.row < self.rows - 1 {
            self.cursor.row += 1;
        }
    }

    /// Backspace - move cursor left
    pub fn backspace(&mut self) {
        self.cursor.wrap_pending = false;
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    /// Horizontal tab, stops every 8 columns
    pub fn horizontal_tab(&mut self) {
        self.cursor.wrap_pending = false;
        self.cursor.col = (self.cursor.col / 8 + 1)
            .saturating_mul(8)
            .min(self.cols - 1);
    }

    /// Scroll the region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        for _ in 0..n {
            let removed = self.lines.remove(top as usize);
            if top == 0 {
                self.push_to_scrollback(removed);
            }
            self.lines.insert(bottom as usize, Row::new(self.cols));
        }
    }

    /// Scroll the region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        for _ in 0..n {
            self.lines.remove(bottom as usize);
            self.lines.insert(top as usize, Row::new(self.cols));
        }
    }

    fn push_to_scrollback(&mut self, row: Row) {
        self.scrollback.push_back(row);
        if self.scrollback.len() > SCROLLBACK_LIMIT {
            self.scrollback.pop_front();
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.row = self.cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.row = self.cursor.row.saturating_add(n).min(self.rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.col = self.cursor.col.saturating_add(n).min(self.cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// CHA (1-indexed)
    pub fn cursor_column(&mut self, col: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// VPA (1-indexed)
    pub fn cursor_row(&mut self, row: u16) {
        self.cursor.wrap_pending = false;
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
    }

    /// ICH - shift cells right from the cursor
    pub fn insert_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let cells = &mut self.lines[self.cursor.row as usize].cells;
        for _ in 0..n.min(self.cols) {
            cells.pop();
            cells.insert(col, Cell::default());
        }
    }

    /// DCH - shift cells left onto the cursor
    pub fn delete_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let cells = &mut self.lines[self.cursor.row as usize].cells;
        for _ in 0..n.min(self.cols) {
            cells.remove(col);
            cells.push(Cell::default());
        }
    }

    /// ECH - blank cells from the cursor without shifting
    pub fn erase_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let cells = &mut self.lines[self.cursor.row as usize].cells;
        let end = (col + n as usize).min(cells.len());
        cells[col..end].iter_mut().for_each(|c| *c = Cell::default());
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        let cursor_row = self.cursor.row as usize;
        match mode {
            0 => {
                self.erase_in_line(0);
                for row in self.lines.iter_mut().skip(cursor_row + 1) {
                    row.clear();
                }
            }
            1 => {
                for row in self.lines.iter_mut().take(cursor_row) {
                    row.clear();
                }
                self.erase_in_line(1);
            }
            2 => {
                for row in self.lines.iter_mut() {
                    row.clear();
                }
            }
            3 => self.scrollback.clear(),
            _ => {}
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        let col = self.cursor.col as usize;
        let row = &mut self.lines[self.cursor.row as usize];
        match mode {
            0 => row.cells[col..].iter_mut().for_each(|c| *c = Cell::default()),
            1 => row.cells[..=col].iter_mut().for_each(|c| *c = Cell::default()),
            2 => row.clear(),
            _ => {}
        }
    }

    /// Insert blank lines at the cursor, within the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.cursor.row;
        if row < top || row > bottom {
            return;
        }
        for _ in 0..n.min(bottom - row + 1) {
            self.lines.remove(bottom as usize);
            self.lines.insert(row as usize, Row::new(self.cols));
        }
    }

    /// Delete lines at the cursor, within the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.cursor.row;
        if row < top || row > bottom {
            return;
        }
        for _ in 0..n.min(bottom - row + 1) {
            self.lines.remove(row as usize);
            self.lines.insert(bottom as usize, Row::new(self.cols));
        }
    }

    /// Set scroll region (1-indexed, inclusive); invalid regions reset to full screen
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.saturating_sub(1);
        let bottom = if bottom == 0 { self.rows } else { bottom.min(self.rows) }.saturating_sub(1);
        self.scroll_region = if top < bottom { (top, bottom) } else { (0, self.rows - 1) };
        self.cursor_position(1, 1);
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some(self.cursor);
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved_cursor {
            self.cursor = saved;
            self.cursor.row = self.cursor.row.min(self.rows - 1);
            self.cursor.col = self.cursor.col.min(self.cols - 1);
        }
    }

    /// DEC private modes we track; everything else is accepted and ignored
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            _ => {}
        }
    }

    /// Reverse index - move up, scrolling down at the top margin
    pub fn reverse_index(&mut self) {
        self.cursor.wrap_pending = false;
        if self.cursor.row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor.row = self.cursor.row.saturating_sub(1);
        }
    }

    /// Reset screen and scrollback to blank, cursor home. Modes and
    /// title survive.
    pub fn clear(&mut self) {
        self.scrollback.clear();
        self.lines = (0..self.rows).map(|_| Row::new(self.cols)).collect();
        self.cursor = CursorState::default();
        self.saved_cursor = None;
        self.scroll_region = (0, self.rows - 1);
    }

    /// Serialize scrollback and screen as replayable text.
    ///
    /// Writing the result into a fresh state of the same size reproduces
    /// the same lines and cursor position.
    pub fn serialize(&self) -> String {
        let mut lines: Vec<String> = self.scrollback_lines();
        lines.extend(self.screen_lines());

        let keep = if self.scrollback.is_empty() {
            let last_text = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
            last_text.max(self.cursor.row as usize + 1)
        } else {
            lines.len()
        };
        lines.truncate(keep);

        let mut out = lines.join("\r\n");
        out.push_str(&format!("\x1b[{};{}H", self.cursor.row + 1, self.cursor.col + 1));
        out
    }
}

/// Cursor position; `wrap_pending` marks a write at the right margin
/// whose wrap is deferred until the next printable character
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CursorState {
    pub row: u16,
    pub col: u16,
    pub wrap_pending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerminalModes {
    pub auto_wrap: bool,
    pub application_cursor: bool,
    pub linefeed_newline: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            auto_wrap: true,
            application_cursor: false,
            linefeed_newline: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Row continues on the next line (soft wrap)
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::default());
        if let Some(last) = self.cells.last_mut() {
            if last.width == 2 {
                *last = Cell::default();
            }
        }
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = Cell::default());
        self.wrapped = false;
    }

    pub fn text(&self) -> String {
        let text: String = self
            .cells
            .iter()
            .filter(|c| !c.is_continuation())
            .map(|c| c.grapheme.as_str())
            .collect();
        text.trim_end_matches(' ').to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: " ".to_string(),
            width: 1,
        }
    }
}

impl Cell {
    /// Right half of a wide character
    pub fn continuation() -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(state: &mut TerminalState, text: &str) {
        for ch in text.chars() {
            match ch {
                '\r' => state.carriage_return(),
                '\n' => state.linefeed(),
                _ => state.put_char(ch),
            }
        }
    }

    #[test]
    fn test_deferred_wrap() {
        let mut state = TerminalState::new(4, 3);
        write(&mut state, "abcd");
        assert_eq!(state.cursor().row, 0);
        assert!(state.cursor().wrap_pending);

        write(&mut state, "e");
        assert_eq!(state.screen_lines()[0], "abcd");
        assert_eq!(state.screen_lines()[1], "e");
    }

    #[test]
    fn test_full_width_line_then_crlf_has_no_blank_line() {
        let mut state = TerminalState::new(4, 3);
        write(&mut state, "abcd\r\nx");
        assert_eq!(state.screen_lines(), vec!["abcd", "x", ""]);
    }

    #[test]
    fn test_scroll_into_scrollback() {
        let mut state = TerminalState::new(10, 2);
        write(&mut state, "one\r\ntwo\r\nthree");
        assert_eq!(state.scrollback_lines(), vec!["one"]);
        assert_eq!(state.screen_lines(), vec!["two", "three"]);
    }

    #[test]
    fn test_shrink_and_grow_rows_anchor_on_cursor() {
        let mut state = TerminalState::new(10, 4);
        write(&mut state, "a\r\nb\r\nc\r\nd");
        state.resize(10, 2);
        assert_eq!(state.scrollback_lines(), vec!["a", "b"]);
        assert_eq!(state.screen_lines(), vec!["c", "d"]);
        assert_eq!(state.cursor().row, 1);

        state.resize(10, 4);
        assert!(state.scrollback_lines().is_empty());
        assert_eq!(state.screen_lines(), vec!["a", "b", "c", "d"]);
        assert_eq!(state.cursor().row, 3);
    }

    #[test]
    fn test_wide_char_occupies_two_cells() {
        let mut state = TerminalState::new(5, 1);
        write(&mut state, "你好");
        assert_eq!(state.cursor().col, 4);
        assert_eq!(state.screen_lines()[0], "你好");
    }

    #[test]
    fn test_cursor_stays_in_bounds_at_widest_grid() {
        let mut state = TerminalState::new(u16::MAX, 1);

        state.cursor_column(65530);
        state.horizontal_tab();
        assert_eq!(state.cursor().col, u16::MAX - 1);

        state.modes.auto_wrap = false;
        state.put_char('你');
        assert_eq!(state.cursor().col, u16::MAX - 1);
    }

    #[test]
    fn test_clear_blanks_everything() {
        let mut state = TerminalState::new(10, 3);
        write(&mut state, "one\r\ntwo\r\nthree\r\n$ ");
        state.clear();
        assert_eq!(state.scrollback_len(), 0);
        assert_eq!(state.screen_lines(), vec!["", "", ""]);
        assert_eq!(state.cursor(), CursorState::default());
    }

    #[test]
    fn test_serialize_replays_to_same_state() {
        let mut state = TerminalState::new(8, 3);
        write(&mut state, "one\r\ntwo\r\nthree\r\nfour\r\n$ ");

        let mut replay = TerminalState::new(8, 3);
        let serialized = state.serialize();
        let (text, _) = serialized.split_at(serialized.find('\x1b').unwrap());
        write(&mut replay, text);
        replay.cursor_position(state.cursor().row + 1, state.cursor().col + 1);

        assert_eq!(replay.scrollback_lines(), state.scrollback_lines());
        assert_eq!(replay.screen_lines(), state.screen_lines());
        assert_eq!(replay.cursor(), state.cursor());
    }
}
