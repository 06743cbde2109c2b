//! Mutable cell matrix.
//!
//! Row-major flat vector of protocol cells with the erase and scroll
//! primitives the terminal dispatches into. Erased cells keep the colors the
//! caller supplies, so attribute state stays a terminal concern.

use gridlink_protocol::PackedCell;

/// 2D cell grid, `cols x rows`, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: Vec<PackedCell>,
    cols: u16,
    rows: u16,
}

impl Grid {
    /// Create a grid filled with copies of `blank`.
    pub fn new(cols: u16, rows: u16, blank: PackedCell) -> Self {
        assert!(cols > 0 && rows > 0, "grid dimensions must be non-zero");
        Self {
            cells: vec![blank; cols as usize * rows as usize],
            cols,
            rows,
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// All cells, row-major. This is the payload a publisher copies out.
    pub fn cells(&self) -> &[PackedCell] {
        &self.cells
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&PackedCell> {
        if row < self.rows && col < self.cols {
            Some(&self.cells[self.index(row, col)])
        } else {
            None
        }
    }

    /// Write a cell, ignoring out-of-bounds positions.
    pub fn set(&mut self, row: u16, col: u16, cell: PackedCell) {
        if row < self.rows && col < self.cols {
            let idx = self.index(row, col);
            self.cells[idx] = cell;
        }
    }

    // ── Erase primitives ───────────────────────────────────────────

    /// ED 2: blank the whole grid.
    pub fn erase_all(&mut self, blank: PackedCell) {
        self.cells.fill(blank);
    }

    /// ED 0: blank from `(row, col)` to the end of the grid.
    pub fn erase_below(&mut self, row: u16, col: u16, blank: PackedCell) {
        if row >= self.rows {
            return;
        }
        let start = self.index(row, col.min(self.cols));
        self.cells[start..].fill(blank);
    }

    /// ED 1: blank from the start of the grid through `(row, col)`.
    pub fn erase_above(&mut self, row: u16, col: u16, blank: PackedCell) {
        if row >= self.rows {
            return;
        }
        let end = self.index(row, 0) + (col.min(self.cols - 1) as usize) + 1;
        self.cells[..end].fill(blank);
    }

    /// EL 0: blank from `(row, col)` to the end of the row.
    pub fn erase_line_right(&mut self, row: u16, col: u16, blank: PackedCell) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let start = self.index(row, col);
        let end = self.index(row, 0) + self.cols as usize;
        self.cells[start..end].fill(blank);
    }

    /// EL 1: blank from the start of the row through `(row, col)`.
    pub fn erase_line_left(&mut self, row: u16, col: u16, blank: PackedCell) {
        if row >= self.rows {
            return;
        }
        let start = self.index(row, 0);
        let end = start + (col.min(self.cols - 1) as usize) + 1;
        self.cells[start..end].fill(blank);
    }

    /// EL 2: blank the whole row.
    pub fn erase_line(&mut self, row: u16, blank: PackedCell) {
        if row >= self.rows {
            return;
        }
        let start = self.index(row, 0);
        self.cells[start..start + self.cols as usize].fill(blank);
    }

    // ── Scroll ─────────────────────────────────────────────────────

    /// Shift all rows up by `count`, blanking the exposed rows at the
    /// bottom. Scrolling by the full height or more clears the grid.
    pub fn scroll_up(&mut self, count: u16, blank: PackedCell) {
        let count = count.min(self.rows);
        if count == 0 {
            return;
        }
        let cols = self.cols as usize;
        let shift = count as usize * cols;
        let len = self.cells.len();
        self.cells.copy_within(shift..len, 0);
        self.cells[len - shift..].fill(blank);
    }

    fn index(&self, row: u16, col: u16) -> usize {
        row as usize * self.cols as usize + col as usize
    }
}
