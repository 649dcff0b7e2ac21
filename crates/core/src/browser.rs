//! Interactive image selection.
//!
//! [`BrowserController::run`] lists a directory, lets the user page through
//! it and either descends into a directory or writes the chosen image into
//! program storage. Input is polled every [`BROWSER_TICK_MS`].

use crate::catalog::{Catalog, CatalogEntry};
use crate::display::{color, TextDisplay, VideoMode};
use crate::flash::{FlashDevice, FlashError, FlashProgrammer, InterruptControl, LoadedImage};
use crate::input::{Buttons, ControlSource};
use crate::logging::{log, LogCategory, LogLevel};
use crate::platform::Platform;
use crate::storage::{self, Storage, StorageError};

pub const BROWSER_TICK_MS: u32 = 100;
/// How long a rejected image's message stays up
pub const REJECT_MESSAGE_MS: u32 = 5000;
/// Pause between "Loading..." and the erase
pub const LOAD_NOTICE_MS: u32 = 500;

const LOAD_WINDOW_WIDTH: usize = 43;
const LOAD_WINDOW_HEIGHT: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum BrowserError {
    #[error("failed to open directory {path}")]
    DirectoryOpen {
        path: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Flash(#[from] FlashError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserOutcome {
    /// A new image was written to program storage
    Loaded(LoadedImage),
    /// SELECT: run whatever program storage already holds
    Previous,
    Reboot,
    /// The input source ended
    InputClosed,
}

/// Cursor position in a catalog: the first visible entry and the
/// highlighted row on the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: usize,
    pub row: usize,
}

impl PageCursor {
    /// Catalog index under the cursor
    pub fn index(&self) -> usize {
        self.offset + self.row
    }

    /// Apply held directions: up/down move one entry and scroll at the page
    /// edges, right/left move a page.
    pub fn navigate(&mut self, buttons: &Buttons, total: usize, per_page: usize) {
        if buttons.down && self.index() + 1 < total {
            if self.row + 1 < per_page {
                self.row += 1;
            } else {
                self.offset += 1;
            }
        }
        if buttons.up {
            if self.row > 0 {
                self.row -= 1;
            } else if self.offset > 0 {
                self.offset -= 1;
            }
        }
        if buttons.right {
            self.offset += per_page;
            if self.index() + 1 > total {
                self.offset = total.saturating_sub(self.row + 1);
            }
        }
        if buttons.left {
            if self.offset > per_page {
                self.offset -= per_page;
            } else {
                self.offset = 0;
                self.row = 0;
            }
        }
    }
}

pub struct BrowserController {
    home: String,
    extensions: String,
    path: String,
}

impl BrowserController {
    pub fn new(home: &str, extensions: &str) -> Self {
        Self {
            home: home.to_string(),
            extensions: extensions.to_string(),
            path: home.to_string(),
        }
    }

    /// Directory currently shown
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entries per page: the window minus its borders and the status line
    pub fn per_page<D: TextDisplay + ?Sized>(display: &D) -> usize {
        display.rows().saturating_sub(3)
    }

    /// Browse from the home directory until an outcome is reached
    pub fn run<S, F, I, C, D, P>(
        &mut self,
        storage: &mut S,
        programmer: &mut FlashProgrammer<F, I>,
        controls: &mut C,
        display: &mut D,
        platform: &mut P,
    ) -> Result<BrowserOutcome, BrowserError>
    where
        S: Storage,
        F: FlashDevice,
        I: InterruptControl,
        C: ControlSource + ?Sized,
        D: TextDisplay + ?Sized,
        P: Platform + ?Sized,
    {
        self.path = self.home.clone();
        display.set_mode(VideoMode::Text);
        controls.disarm_confirm();
        let per_page = Self::per_page(display);

        'directory: loop {
            self.draw_frame(display);
            let catalog = match Catalog::build(storage, &self.path, &self.extensions) {
                Ok(catalog) => catalog,
                Err(source) => {
                    display.draw_text("Failed to open directory", 1, 1, color::RED, color::BLACK);
                    log(LogCategory::Browser, LogLevel::Error, || {
                        format!("cannot open {:?}: {}", self.path, source)
                    });
                    return Err(BrowserError::DirectoryOpen {
                        path: self.path.clone(),
                        source,
                    });
                }
            };
            if catalog.is_truncated() {
                let x = display.cols().saturating_sub(17);
                display.draw_text(" Too many files!! ", x, 0, color::LIGHT_RED, color::CYAN);
            }

            let mut cursor = PageCursor::default();
            loop {
                Self::draw_page(display, &catalog, cursor, per_page);
                platform.sleep_ms(BROWSER_TICK_MS);

                let Some(state) = controls.poll() else {
                    return Ok(BrowserOutcome::InputClosed);
                };
                if state.reboot_chord {
                    platform.reboot();
                    return Ok(BrowserOutcome::Reboot);
                }
                if state.buttons.select {
                    return Ok(BrowserOutcome::Previous);
                }
                cursor.navigate(&state.buttons, catalog.len(), per_page);

                if !state.confirm_edge {
                    continue;
                }
                let Some(entry) = catalog.get(cursor.index()) else {
                    continue;
                };
                if entry.is_directory {
                    self.path = if entry.is_parent() {
                        storage::parent(&self.path)
                    } else {
                        storage::join(&self.path, &entry.name)
                    };
                    log(LogCategory::Browser, LogLevel::Debug, || {
                        format!("entering {:?}", self.path)
                    });
                    controls.disarm_confirm();
                    continue 'directory;
                }
                if entry.is_executable {
                    let path = storage::join(&self.path, &entry.name);
                    match Self::load(storage, programmer, display, platform, &path) {
                        Ok(image) => return Ok(BrowserOutcome::Loaded(image)),
                        Err(FlashError::ImageTooLarge { .. }) => {
                            controls.disarm_confirm();
                            continue 'directory;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Write `path` into program storage behind a progress window. An
    /// oversized image is reported on screen and nothing is written.
    fn load<S, F, I, D, P>(
        storage: &mut S,
        programmer: &mut FlashProgrammer<F, I>,
        display: &mut D,
        platform: &mut P,
        path: &str,
    ) -> Result<LoadedImage, FlashError>
    where
        S: Storage,
        F: FlashDevice,
        I: InterruptControl,
        D: TextDisplay + ?Sized,
        P: Platform + ?Sized,
    {
        let x = display.cols().saturating_sub(LOAD_WINDOW_WIDTH) / 2;
        let y = display.rows().saturating_sub(LOAD_WINDOW_HEIGHT) / 2;
        display.draw_window("Loading ROM", x, y, LOAD_WINDOW_WIDTH, LOAD_WINDOW_HEIGHT);

        if let Err(e) = programmer.check_fits(storage, path) {
            if matches!(e, FlashError::ImageTooLarge { .. }) {
                display.draw_text(
                    "ERROR: ROM too large! Canceled!!",
                    x + 1,
                    y + 2,
                    color::LIGHT_MAGENTA,
                    color::BLUE,
                );
                platform.sleep_ms(REJECT_MESSAGE_MS);
            }
            return Err(e);
        }

        display.draw_text("Loading...", x + 1, y + 2, color::LIGHT_GREEN, color::BLUE);
        platform.sleep_ms(LOAD_NOTICE_MS);

        let result = programmer.write_with_progress(storage, path, |offset| {
            platform.set_status_led((offset >> 13) & 1 == 1);
        });
        platform.set_status_led(true);

        match result {
            Ok(image) => {
                log(LogCategory::Browser, LogLevel::Info, || {
                    format!("loaded {} ({} bytes)", image.name, image.size)
                });
                Ok(image)
            }
            Err(e) => {
                display.draw_text(
                    &format!("{:<41.41}", format!("ERROR: {}", e)),
                    x + 1,
                    y + 2,
                    color::LIGHT_RED,
                    color::BLUE,
                );
                Err(e)
            }
        }
    }

    fn draw_frame<D: TextDisplay + ?Sized>(&self, display: &mut D) {
        let cols = display.cols();
        let rows = display.rows();
        let title = if storage::is_root(&self.path) {
            "SD:\\".to_string()
        } else {
            format!("SD:{}", self.path)
        };
        display.draw_window(&title, 0, 0, cols, rows.saturating_sub(1));

        let footer = rows.saturating_sub(1);
        display.draw_text(&" ".repeat(cols), 0, footer, color::BLACK, color::BLACK);
        let hints = [
            ("START", " Run at cursor "),
            ("SELECT", " Run previous  "),
            ("ARROWS", " Navigation    "),
        ];
        let mut x = 0;
        for (key, text) in hints {
            display.draw_text(key, x, footer, color::LIGHT_GRAY, color::BLACK);
            x += key.len();
            display.draw_text(text, x, footer, color::BLACK, color::CYAN);
            x += text.len() + 1;
        }
    }

    fn draw_page<D: TextDisplay + ?Sized>(
        display: &mut D,
        catalog: &Catalog,
        cursor: PageCursor,
        per_page: usize,
    ) {
        let width = display.cols().saturating_sub(2);
        for row in 0..per_page {
            let selected = row == cursor.row;
            let (mut fg, bg) = if selected {
                (color::BLACK, color::CYAN)
            } else {
                (color::LIGHT_CYAN, color::BLUE)
            };
            let index = cursor.offset + row;
            let text = match catalog.get(index) {
                Some(entry) => {
                    if entry.is_directory {
                        fg = color::WHITE;
                    }
                    if entry.is_executable {
                        fg = color::LIGHT_GREEN;
                    }
                    if selected {
                        Self::draw_status(display, entry, index, catalog.len(), per_page);
                    }
                    entry.name.chars().take(width).collect::<String>()
                }
                None => String::new(),
            };
            display.draw_text(&format!("{:<width$}", text, width = width), 1, row + 1, fg, bg);
        }
    }

    fn draw_status<D: TextDisplay + ?Sized>(
        display: &mut D,
        entry: &CatalogEntry,
        index: usize,
        total: usize,
        per_page: usize,
    ) {
        let width = display.cols().saturating_sub(2);
        let y = per_page + 1;
        display.draw_text(&"═".repeat(width), 1, y, color::LIGHT_CYAN, color::BLUE);
        let status = format!(
            " Size: {}Kb, File {} of {} ",
            entry.size / 1024,
            index + 1,
            total
        );
        display.draw_text(&status, 2, y, color::YELLOW, color::CYAN);
    }
}
