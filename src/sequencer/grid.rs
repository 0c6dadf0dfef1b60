/// Grid state - which (row, column) cells are active
///
/// The grid has a fixed shape: one row per pitch and one column per step.
/// Coordinates outside that shape are a caller bug and panic.
pub const ROWS: usize = 8;
pub const COLS: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    cells: [[bool; COLS]; ROWS],
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        ROWS
    }

    pub fn cols(&self) -> usize {
        COLS
    }

    pub fn is_active(&self, row: usize, col: usize) -> bool {
        check_bounds(row, col);
        self.cells[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        check_bounds(row, col);
        self.cells[row][col] = value;
    }

    /// Flip a cell and return its new value.
    pub fn toggle(&mut self, row: usize, col: usize) -> bool {
        check_bounds(row, col);
        let cell = &mut self.cells[row][col];
        *cell = !*cell;
        *cell
    }

    pub fn clear(&mut self) {
        for row in &mut self.cells {
            for cell in row {
                *cell = false;
            }
        }
    }

    /// Rows that are active in the given column, top to bottom.
    pub fn active_rows(&self, col: usize) -> impl Iterator<Item = usize> + '_ {
        assert!(col < COLS, "column {col} out of range (0..{COLS})");
        (0..ROWS).filter(move |&row| self.cells[row][col])
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|cell| **cell).count()
    }
}

fn check_bounds(row: usize, col: usize) {
    assert!(
        row < ROWS && col < COLS,
        "cell ({row}, {col}) out of range ({ROWS}x{COLS})"
    );
}
