//! Storage and control layer of a handheld cartridge emulator.
//!
//! The control context browses removable storage for program images, streams
//! the chosen one into execute-in-place flash and then feeds the emulator one
//! joypad value per frame. A second, presentation context scans the input
//! devices and is parked while flash is rewritten.

pub mod browser;
pub mod catalog;
pub mod config;
pub mod display;
pub mod emulator;
pub mod flash;
pub mod input;
pub mod lockout;
pub mod logging;
pub mod menu;
pub mod platform;
pub mod presentation;
pub mod session;
pub mod settings;
pub mod storage;

pub use browser::{BrowserController, BrowserError, BrowserOutcome};
pub use catalog::{Catalog, CatalogEntry};
pub use config::{ConfigRecord, ConfigStore};
pub use flash::{FlashDevice, FlashError, FlashProgrammer, InterruptControl, LoadedImage};
pub use session::{Session, SessionError, SessionExit, SessionOptions};
pub use storage::{Storage, StorageError};
