//! Block-storage collaborator.
//!
//! The device reaches its removable card through a FAT library that offers
//! open/read/write/stat/mkdir and directory iteration. [`Storage`] is that
//! surface; [`HostStorage`] maps it onto a host directory and [`MemStorage`]
//! keeps everything in memory for tests and dry runs.
//!
//! Paths use the device convention: backslash separated, rooted at `""`
//! (or `"\"`), e.g. `\PCE\games\bonk.pce`.

use std::io::{Read, Write};

mod host;
mod memory;

pub use host::HostStorage;
pub use memory::MemStorage;

/// Path separator used on the device
pub const SEPARATOR: char = '\\';

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// One raw directory entry as reported by the storage library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Result of a stat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Name of the final path component, as the library reports it
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// File access primitives of the removable storage.
pub trait Storage {
    type Dir: Iterator<Item = Result<DirEntry, StorageError>>;
    type Reader: Read;
    type Writer: Write;

    /// Begin iterating a directory's entries (no `.`/`..` entries).
    fn open_dir(&mut self, path: &str) -> Result<Self::Dir, StorageError>;

    fn stat(&mut self, path: &str) -> Result<FileStat, StorageError>;

    /// Open an existing file for reading.
    fn open(&mut self, path: &str) -> Result<Self::Reader, StorageError>;

    /// Create a file, truncating it if it exists.
    fn create(&mut self, path: &str) -> Result<Self::Writer, StorageError>;

    /// Create a directory. Succeeds if it already exists.
    fn mkdir(&mut self, path: &str) -> Result<(), StorageError>;
}

/// True for the storage root (`""` or `"\"`)
pub fn is_root(path: &str) -> bool {
    path.trim_matches(SEPARATOR).is_empty()
}

/// Append `name` to `base`
pub fn join(base: &str, name: &str) -> String {
    if is_root(base) {
        format!("{}{}", SEPARATOR, name)
    } else {
        format!("{}{}{}", base.trim_end_matches(SEPARATOR), SEPARATOR, name)
    }
}

/// Drop the last component: `\PCE\games` -> `\PCE`, `\PCE` -> `""`
pub fn parent(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => trimmed[..idx].to_string(),
        None => String::new(),
    }
}

/// Last component of a path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    trimmed
        .rfind(SEPARATOR)
        .map_or(trimmed, |idx| &trimmed[idx + 1..])
}

/// Non-empty components of a path
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_detection() {
        assert!(is_root(""));
        assert!(is_root("\\"));
        assert!(!is_root("\\PCE"));
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("", "PCE"), "\\PCE");
        assert_eq!(join("\\PCE", "games"), "\\PCE\\games");
        assert_eq!(parent("\\PCE\\games"), "\\PCE");
        assert_eq!(parent("\\PCE"), "");
        assert_eq!(parent(""), "");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("\\PCE\\bonk.pce"), "bonk.pce");
        assert_eq!(file_name("bonk.pce"), "bonk.pce");
        assert_eq!(
            components("\\PCE\\\\games\\").collect::<Vec<_>>(),
            ["PCE", "games"]
        );
    }
}
