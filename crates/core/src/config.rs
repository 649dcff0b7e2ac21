//! Persistent device configuration.
//!
//! The record is stored as raw bytes in field order, one byte per field,
//! with no header or version. Newer fields are appended, so a shorter file
//! written by an older build still loads: fields past its end keep their
//! defaults.

use crate::logging::{log, LogCategory, LogLevel};
use crate::storage::{self, Storage, StorageError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Directory the device keeps its own files in
pub const HOME_DIR: &str = "\\PCE";
pub const CONFIG_FILE_NAME: &str = "pico-pce.cfg";

/// Encoded size of [`ConfigRecord`]
pub const RECORD_LEN: usize = 7;

/// Composite video output settings. The enumerated fields are indices into
/// the menu's display tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// 0 = PAL, 1 = NTSC
    pub tv_system: u8,
    /// 0..=3 for 624, 625, 524, 525 lines
    pub tv_lines: u8,
    /// 0 = 3.579545 MHz, 1 = 4.433619 MHz
    pub color_freq: u8,
    pub color: bool,
    pub shift_lines: bool,
    pub shift_half_frame: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            tv_system: 0,
            tv_lines: 1,
            color_freq: 1,
            color: true,
            shift_lines: false,
            shift_half_frame: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub swap_ab: bool,
    pub display: DisplaySettings,
}

impl ConfigRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let d = &self.display;
        [
            u8::from(self.swap_ab),
            d.tv_system,
            d.tv_lines,
            d.color_freq,
            u8::from(d.color),
            u8::from(d.shift_lines),
            u8::from(d.shift_half_frame),
        ]
    }

    /// Decode as many fields as `bytes` holds; the rest stay at their
    /// defaults and trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut record = Self::default();
        let d = &mut record.display;
        for (i, &b) in bytes.iter().take(RECORD_LEN).enumerate() {
            match i {
                0 => record.swap_ab = b != 0,
                1 => d.tv_system = b,
                2 => d.tv_lines = b,
                3 => d.color_freq = b,
                4 => d.color = b != 0,
                5 => d.shift_lines = b != 0,
                _ => d.shift_half_frame = b != 0,
            }
        }
        record
    }
}

/// Loads and saves the [`ConfigRecord`] file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    path: String,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::in_dir(HOME_DIR)
    }
}

impl ConfigStore {
    pub fn in_dir(dir: &str) -> Self {
        Self {
            path: storage::join(dir, CONFIG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read the record. A missing or unreadable file gives defaults.
    pub fn load<S: Storage>(&self, storage: &mut S) -> ConfigRecord {
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        let result = storage.open(&self.path).and_then(|file| {
            file.take(RECORD_LEN as u64)
                .read_to_end(&mut bytes)
                .map_err(|e| StorageError::io(&self.path, e))
        });

        match result {
            Ok(_) => {
                if bytes.len() < RECORD_LEN {
                    log(LogCategory::Config, LogLevel::Info, || {
                        format!(
                            "{} holds {} of {} bytes, remaining fields use defaults",
                            self.path,
                            bytes.len(),
                            RECORD_LEN
                        )
                    });
                }
                ConfigRecord::decode(&bytes)
            }
            Err(e) => {
                log(LogCategory::Config, LogLevel::Warn, || {
                    format!("using default configuration: {}", e)
                });
                ConfigRecord::default()
            }
        }
    }

    /// Write the record, replacing any existing file
    pub fn save<S: Storage>(&self, storage: &mut S, record: &ConfigRecord) -> Result<(), StorageError> {
        let mut file = storage.create(&self.path)?;
        file.write_all(&record.encode())
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::io(&self.path, e))?;
        log(LogCategory::Config, LogLevel::Debug, || {
            format!("saved configuration to {}", self.path)
        });
        Ok(())
    }
}
