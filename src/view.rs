/// View binding - the visual state of the grid
///
/// `GridView` is what the sequencer tells about state changes. `GridSurface`
/// is the in-memory model of the 8x8 cells and the start button that a front
/// end draws from.
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::sequencer::grid::{COLS, ROWS};

pub const DEFAULT_FEEDBACK: Duration = Duration::from_millis(300);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        const ACTIVE    = 0b001;
        const HIGHLIGHT = 0b010;
        const FEEDBACK  = 0b100;
    }
}

pub trait GridView {
    fn set_active(&mut self, row: usize, col: usize, active: bool);

    fn clear_all_active(&mut self);

    /// Move the playhead highlight to `col`.
    fn highlight_column(&mut self, col: usize);

    /// Briefly mark a cell that was just switched on.
    fn flash_cell(&mut self, row: usize, col: usize);

    fn flash_start_button(&mut self);

    fn set_playing(&mut self, playing: bool);
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    flags: CellFlags,
    feedback_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct GridSurface {
    cells: [[Cell; COLS]; ROWS],
    highlighted: Option<usize>,
    playing: bool,
    start_feedback_until: Option<Instant>,
    feedback: Duration,
}

impl GridSurface {
    pub fn new(feedback: Duration) -> Self {
        Self {
            cells: [[Cell::default(); COLS]; ROWS],
            highlighted: None,
            playing: false,
            start_feedback_until: None,
            feedback,
        }
    }

    pub fn flags(&self, row: usize, col: usize) -> CellFlags {
        self.cells[row][col].flags
    }

    pub fn highlighted_column(&self) -> Option<usize> {
        self.highlighted
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn start_label(&self) -> &'static str {
        if self.playing {
            "Stop Sequence"
        } else {
            "Start Sequence"
        }
    }

    pub fn start_button_flashing(&self) -> bool {
        self.start_feedback_until.is_some()
    }

    /// Drop transient feedback whose time has passed.
    pub fn expire_feedback(&mut self, now: Instant) {
        for cell in self.cells.iter_mut().flatten() {
            if cell.feedback_until.is_some_and(|until| until <= now) {
                cell.feedback_until = None;
                cell.flags.remove(CellFlags::FEEDBACK);
            }
        }
        if self.start_feedback_until.is_some_and(|until| until <= now) {
            self.start_feedback_until = None;
        }
    }

    /// Earliest pending feedback expiry, so a front end knows when to redraw.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.cells
            .iter()
            .flatten()
            .filter_map(|cell| cell.feedback_until)
            .chain(self.start_feedback_until)
            .min()
    }
}

impl Default for GridSurface {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK)
    }
}

impl GridView for GridSurface {
    fn set_active(&mut self, row: usize, col: usize, active: bool) {
        self.cells[row][col].flags.set(CellFlags::ACTIVE, active);
    }

    fn clear_all_active(&mut self) {
        for cell in self.cells.iter_mut().flatten() {
            cell.flags.remove(CellFlags::ACTIVE);
        }
    }

    fn highlight_column(&mut self, col: usize) {
        if let Some(previous) = self.highlighted.take() {
            for row in &mut self.cells {
                row[previous].flags.remove(CellFlags::HIGHLIGHT);
            }
        }
        for row in &mut self.cells {
            row[col].flags.insert(CellFlags::HIGHLIGHT);
        }
        self.highlighted = Some(col);
    }

    fn flash_cell(&mut self, row: usize, col: usize) {
        let cell = &mut self.cells[row][col];
        cell.flags.insert(CellFlags::FEEDBACK);
        cell.feedback_until = Some(Instant::now() + self.feedback);
    }

    fn flash_start_button(&mut self) {
        self.start_feedback_until = Some(Instant::now() + self.feedback);
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }
}
