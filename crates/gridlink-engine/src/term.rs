//! Terminal state: cursor, attributes, and action application.
//!
//! [`Terminal`] owns the parser and the grid and turns fed bytes into cell
//! mutations. Cursor and scroll behavior follows standard VT semantics: LF at
//! the bottom row scrolls and blanks the exposed row, CR returns to column 0,
//! BS clamps at the left margin, HT advances to the next 8-column stop, and
//! printing past the right margin wraps to the next row.

use gridlink_protocol::{MAX_COLS, MAX_ROWS, PackedCell, StyleFlags};

use crate::grid::Grid;
use crate::parser::{Action, Parser};

/// Default foreground, light gray.
pub const DEFAULT_FG: u32 = 0xFFCC_CCCC;
/// Default background, black.
pub const DEFAULT_BG: u32 = 0xFF00_0000;

const TAB_WIDTH: u16 = 8;

/// Current text attributes applied to printed cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAttrs {
    pub fg: u32,
    pub bg: u32,
    pub flags: StyleFlags,
}

impl Default for TextAttrs {
    fn default() -> Self {
        Self {
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            flags: StyleFlags::empty(),
        }
    }
}

/// Byte-stream terminal emulator over a fixed-size grid.
#[derive(Debug, Clone)]
pub struct Terminal {
    parser: Parser,
    grid: Grid,
    cursor_col: u16,
    cursor_row: u16,
    attrs: TextAttrs,
    saved: Option<(u16, u16, TextAttrs)>,
}

impl Terminal {
    /// Create a terminal with a blank grid. Dimensions are clamped to the
    /// protocol bounds.
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.clamp(1, MAX_COLS as u16);
        let rows = rows.clamp(1, MAX_ROWS as u16);
        Self {
            parser: Parser::new(),
            grid: Grid::new(cols, rows, blank_cell()),
            cursor_col: 0,
            cursor_row: 0,
            attrs: TextAttrs::default(),
            saved: None,
        }
    }

    pub fn cols(&self) -> u16 {
        self.grid.cols()
    }

    pub fn rows(&self) -> u16 {
        self.grid.rows()
    }

    pub fn cursor(&self) -> (u16, u16) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Row-major cells, the payload for a publish.
    pub fn cells(&self) -> &[PackedCell] {
        self.grid.cells()
    }

    /// Feed PTY output. Applies every completed action; partial sequences
    /// carry over to the next call.
    pub fn feed(&mut self, bytes: &[u8]) {
        let actions = self.parser.feed(bytes);
        for action in actions {
            self.apply(action);
        }
    }

    /// Drop all screen contents and start over at the given dimensions.
    ///
    /// Used on resize: the previous grid belongs to a dead segment, so
    /// content is not reflowed. Parser state and pending attributes survive.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.clamp(1, MAX_COLS as u16);
        let rows = rows.clamp(1, MAX_ROWS as u16);
        self.grid = Grid::new(cols, rows, blank_cell());
        self.cursor_col = 0;
        self.cursor_row = 0;
        self.saved = None;
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Print(ch) => self.print(ch),
            Action::LineFeed => self.line_feed(),
            Action::CarriageReturn => self.cursor_col = 0,
            Action::Tab => {
                let next = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor_col = next.min(self.cols() - 1);
            }
            Action::Backspace => self.cursor_col = self.cursor_col.saturating_sub(1),
            Action::Bell => {}
            Action::CursorUp(n) => self.cursor_row = self.cursor_row.saturating_sub(n),
            Action::CursorDown(n) => {
                self.cursor_row = (self.cursor_row + n).min(self.rows() - 1);
            }
            Action::CursorRight(n) => {
                self.cursor_col = (self.cursor_col + n).min(self.cols() - 1);
            }
            Action::CursorLeft(n) => self.cursor_col = self.cursor_col.saturating_sub(n),
            Action::CursorColumn(col) => self.cursor_col = col.min(self.cols() - 1),
            Action::CursorPosition { row, col } => {
                self.cursor_row = row.min(self.rows() - 1);
                self.cursor_col = col.min(self.cols() - 1);
            }
            Action::EraseInDisplay(mode) => self.erase_display(mode),
            Action::EraseInLine(mode) => self.erase_line(mode),
            Action::Sgr(params) => self.apply_sgr(&params),
            Action::SaveCursor => {
                self.saved = Some((self.cursor_col, self.cursor_row, self.attrs));
            }
            Action::RestoreCursor => {
                if let Some((col, row, attrs)) = self.saved {
                    self.cursor_col = col.min(self.cols() - 1);
                    self.cursor_row = row.min(self.rows() - 1);
                    self.attrs = attrs;
                }
            }
            Action::Raw(_) => {}
        }
    }

    fn print(&mut self, ch: char) {
        if self.cursor_col >= self.cols() {
            self.cursor_col = 0;
            self.line_feed();
        }
        self.grid.set(
            self.cursor_row,
            self.cursor_col,
            PackedCell::new(ch, self.attrs.fg, self.attrs.bg, self.attrs.flags),
        );
        self.cursor_col += 1;
    }

    fn line_feed(&mut self) {
        if self.cursor_row + 1 >= self.rows() {
            self.grid.scroll_up(1, blank_cell());
        } else {
            self.cursor_row += 1;
        }
    }

    fn erase_display(&mut self, mode: u8) {
        let blank = blank_cell();
        match mode {
            0 => self.grid.erase_below(self.cursor_row, self.cursor_col, blank),
            1 => self.grid.erase_above(self.cursor_row, self.cursor_col, blank),
            2 => {
                self.grid.erase_all(blank);
                self.cursor_col = 0;
                self.cursor_row = 0;
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u8) {
        let blank = blank_cell();
        match mode {
            0 => self.grid.erase_line_right(self.cursor_row, self.cursor_col, blank),
            1 => self.grid.erase_line_left(self.cursor_row, self.cursor_col, blank),
            2 => self.grid.erase_line(self.cursor_row, blank),
            _ => {}
        }
    }

    fn apply_sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.attrs = TextAttrs::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.attrs = TextAttrs::default(),
                1 => self.attrs.flags |= StyleFlags::BOLD,
                2 => self.attrs.flags |= StyleFlags::DIM,
                3 => self.attrs.flags |= StyleFlags::ITALIC,
                4 => self.attrs.flags |= StyleFlags::UNDERLINE,
                7 => self.attrs.flags |= StyleFlags::INVERSE,
                22 => self.attrs.flags &= !(StyleFlags::BOLD | StyleFlags::DIM),
                23 => self.attrs.flags &= !StyleFlags::ITALIC,
                24 => self.attrs.flags &= !StyleFlags::UNDERLINE,
                27 => self.attrs.flags &= !StyleFlags::INVERSE,
                n @ 30..=37 => self.attrs.fg = ansi_color((n - 30) as u8),
                n @ 90..=97 => self.attrs.fg = ansi_bright_color((n - 90) as u8),
                n @ 40..=47 => self.attrs.bg = ansi_color((n - 40) as u8),
                n @ 100..=107 => self.attrs.bg = ansi_bright_color((n - 100) as u8),
                39 => self.attrs.fg = DEFAULT_FG,
                49 => self.attrs.bg = DEFAULT_BG,
                n @ (38 | 48) => {
                    let (color, consumed) = match params.get(i + 1) {
                        Some(5) => (
                            params.get(i + 2).map(|&idx| color_256(idx as u8)),
                            2,
                        ),
                        Some(2) => (
                            match (params.get(i + 2), params.get(i + 3), params.get(i + 4)) {
                                (Some(&r), Some(&g), Some(&b)) => {
                                    Some(rgb(r as u8, g as u8, b as u8))
                                }
                                _ => None,
                            },
                            4,
                        ),
                        _ => (None, 0),
                    };
                    if let Some(color) = color {
                        if n == 38 {
                            self.attrs.fg = color;
                        } else {
                            self.attrs.bg = color;
                        }
                    }
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn blank_cell() -> PackedCell {
    PackedCell::blank(DEFAULT_FG, DEFAULT_BG)
}

fn rgb(r: u8, g: u8, b: u8) -> u32 {
    0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Named ANSI colors 0-7.
pub fn ansi_color(index: u8) -> u32 {
    match index {
        0 => 0xFF00_0000, // black
        1 => 0xFFCD_0000, // red
        2 => 0xFF00_CD00, // green
        3 => 0xFFCD_CD00, // yellow
        4 => 0xFF00_00EE, // blue
        5 => 0xFFCD_00CD, // magenta
        6 => 0xFF00_CDCD, // cyan
        7 => 0xFFE5_E5E5, // white
        _ => DEFAULT_FG,
    }
}

/// Bright ANSI colors 0-7 (wire values 90-97 / 100-107).
pub fn ansi_bright_color(index: u8) -> u32 {
    match index {
        0 => 0xFF7F_7F7F,
        1 => 0xFFFF_0000,
        2 => 0xFF00_FF00,
        3 => 0xFFFF_FF00,
        4 => 0xFF5C_5CFF,
        5 => 0xFFFF_00FF,
        6 => 0xFF00_FFFF,
        7 => 0xFFFF_FFFF,
        _ => DEFAULT_FG,
    }
}

/// xterm 256-color palette: 16 named, a 6x6x6 cube, then grayscale.
pub fn color_256(index: u8) -> u32 {
    match index {
        0..=7 => ansi_color(index),
        8..=15 => ansi_bright_color(index - 8),
        16..=231 => {
            let idx = index - 16;
            let r = (idx / 36) * 51;
            let g = ((idx % 36) / 6) * 51;
            let b = (idx % 6) * 51;
            rgb(r, g, b)
        }
        232..=255 => {
            let gray = 8 + (index - 232) * 10;
            rgb(gray, gray, gray)
        }
    }
}
