//! Text-mode output.
//!
//! The browser and the menu draw through [`TextDisplay`], an 80x30 character
//! grid with indexed foreground and background colours. The device driver
//! implements it on top of its frame buffer; [`TextBuffer`] is the host
//! implementation used by the tool and the tests.

use std::fmt;

pub const TEXT_COLS: usize = 80;
pub const TEXT_ROWS: usize = 30;

/// Indices into the 16-colour text palette
pub mod color {
    pub const BLACK: u8 = 0;
    pub const BLUE: u8 = 1;
    pub const CYAN: u8 = 3;
    pub const RED: u8 = 4;
    pub const BROWN: u8 = 6;
    pub const LIGHT_GRAY: u8 = 7;
    pub const LIGHT_GREEN: u8 = 10;
    pub const LIGHT_CYAN: u8 = 11;
    pub const LIGHT_RED: u8 = 12;
    pub const LIGHT_MAGENTA: u8 = 13;
    pub const YELLOW: u8 = 14;
    pub const WHITE: u8 = 15;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// Character grid used by the browser and the menu
    Text,
    /// Emulator frame output
    Graphics,
}

/// Character-grid drawing primitives
///
/// Coordinates are in cells; anything outside the grid is clipped.
pub trait TextDisplay {
    fn set_mode(&mut self, mode: VideoMode);

    /// Framed window with `title` in its top border
    fn draw_window(&mut self, title: &str, x: usize, y: usize, width: usize, height: usize);

    fn draw_text(&mut self, text: &str, x: usize, y: usize, fg: u8, bg: u8);

    fn cols(&self) -> usize {
        TEXT_COLS
    }

    fn rows(&self) -> usize {
        TEXT_ROWS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: u8,
    pub bg: u8,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: color::LIGHT_GRAY,
            bg: color::BLACK,
        }
    }
}

/// In-memory character grid
#[derive(Debug, Clone)]
pub struct TextBuffer {
    cols: usize,
    rows: usize,
    cells: Vec<Cell>,
    mode: VideoMode,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new(TEXT_COLS, TEXT_ROWS)
    }
}

impl TextBuffer {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![Cell::default(); cols * rows],
            mode: VideoMode::Text,
        }
    }

    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    pub fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<Cell> {
        (x < self.cols && y < self.rows).then(|| self.cells[y * self.cols + x])
    }

    /// Row `y` as text, trailing blanks removed
    pub fn row_text(&self, y: usize) -> String {
        if y >= self.rows {
            return String::new();
        }
        let row: String = self.cells[y * self.cols..(y + 1) * self.cols]
            .iter()
            .map(|c| c.ch)
            .collect();
        row.trim_end().to_string()
    }

    pub fn contains(&self, needle: &str) -> bool {
        (0..self.rows).any(|y| self.row_text(y).contains(needle))
    }

    fn put(&mut self, x: usize, y: usize, ch: char, fg: u8, bg: u8) {
        if x < self.cols && y < self.rows {
            self.cells[y * self.cols + x] = Cell { ch, fg, bg };
        }
    }
}

impl TextDisplay for TextBuffer {
    fn set_mode(&mut self, mode: VideoMode) {
        if mode == VideoMode::Text && self.mode != VideoMode::Text {
            self.clear();
        }
        self.mode = mode;
    }

    fn draw_window(&mut self, title: &str, x: usize, y: usize, width: usize, height: usize) {
        if width < 2 || height < 2 {
            return;
        }
        let (fg, bg) = (color::LIGHT_CYAN, color::BLUE);
        let right = x + width - 1;
        let bottom = y + height - 1;
        for row in y..=bottom {
            for col in x..=right {
                let ch = match (row == y || row == bottom, col == x || col == right) {
                    (true, true) => match (row == y, col == x) {
                        (true, true) => '╔',
                        (true, false) => '╗',
                        (false, true) => '╚',
                        (false, false) => '╝',
                    },
                    (true, false) => '═',
                    (false, true) => '║',
                    (false, false) => ' ',
                };
                self.put(col, row, ch, fg, bg);
            }
        }
        let label = format!(" {} ", title);
        let len = label.chars().count().min(width.saturating_sub(2));
        let start = x + (width - len) / 2;
        self.draw_text(&label.chars().take(len).collect::<String>(), start, y, color::WHITE, bg);
    }

    fn draw_text(&mut self, text: &str, x: usize, y: usize, fg: u8, bg: u8) {
        for (i, ch) in text.chars().enumerate() {
            self.put(x + i, y, ch, fg, bg);
        }
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn rows(&self) -> usize {
        self.rows
    }
}

impl fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.rows {
            writeln!(f, "{}", self.row_text(y))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_clipped_to_the_grid() {
        let mut buf = TextBuffer::new(10, 2);
        buf.draw_text("hello world", 3, 1, color::WHITE, color::BLUE);
        assert_eq!(buf.row_text(1), "   hello w");
        buf.draw_text("x", 0, 5, 0, 0);
        assert_eq!(buf.cell(3, 1).map(|c| c.fg), Some(color::WHITE));
        assert!(buf.cell(10, 0).is_none());
    }

    #[test]
    fn test_window_frame_and_title() {
        let mut buf = TextBuffer::default();
        buf.draw_window("SD:\\PCE", 0, 0, TEXT_COLS, TEXT_ROWS - 1);
        let top = buf.row_text(0);
        assert!(top.starts_with('╔'));
        assert!(top.ends_with('╗'));
        assert!(top.contains(" SD:\\PCE "));
        assert_eq!(buf.cell(0, 5).map(|c| c.ch), Some('║'));
        assert_eq!(buf.cell(0, TEXT_ROWS - 2).map(|c| c.ch), Some('╚'));
        assert_eq!(buf.row_text(TEXT_ROWS - 1), "");
    }

    #[test]
    fn test_returning_to_text_mode_clears() {
        let mut buf = TextBuffer::default();
        buf.draw_text("menu", 0, 0, 0, 0);
        buf.set_mode(VideoMode::Graphics);
        assert!(buf.contains("menu"));
        buf.set_mode(VideoMode::Text);
        assert!(!buf.contains("menu"));
        assert_eq!(buf.mode(), VideoMode::Text);
    }
}
