//! Directory catalog: one directory's entries, classified and sorted for the
//! browser.

use crate::logging::{log, LogCategory, LogLevel};
use crate::storage::{self, DirEntry, Storage, StorageError};
use serde::Serialize;
use std::cmp::Ordering;

/// Hard cap on entries per directory, including the parent entry
pub const MAX_ENTRIES: usize = 600;

/// Longest name kept for an entry (FAT long file name limit)
pub const MAX_NAME_LEN: usize = 255;

/// Name of the synthesized parent-directory entry
pub const PARENT_DIR: &str = "..";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub is_directory: bool,
    pub is_executable: bool,
    pub size: u64,
}

impl CatalogEntry {
    fn parent() -> Self {
        Self {
            name: PARENT_DIR.to_string(),
            is_directory: true,
            is_executable: false,
            size: 0,
        }
    }

    fn classify(entry: DirEntry, extensions: &str) -> Self {
        let mut name = entry.name;
        if name.len() > MAX_NAME_LEN {
            let mut end = MAX_NAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        let is_executable = !entry.is_dir && is_executable(&name, extensions);
        Self {
            name,
            is_directory: entry.is_dir,
            is_executable,
            size: entry.size,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.is_directory && self.name == PARENT_DIR
    }
}

/// Directories first, then names in byte order
pub fn compare_entries(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.cmp(&b.name))
}

/// True when the text after the last '.' is non-empty and occurs in
/// `extensions`. `extensions` is a plain string such as `"pce"`; the match is
/// a case-sensitive substring test, so `"PCE"` does not match `"pce"`.
pub fn is_executable(name: &str, extensions: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => extensions.contains(ext),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    truncated: bool,
}

impl Catalog {
    /// List `path` through `storage`.
    ///
    /// A non-root path gets a leading ".." entry. Iteration stops at
    /// [`MAX_ENTRIES`]; if the directory holds more, the catalog is marked
    /// truncated. A failing entry ends the listing early.
    pub fn build<S: Storage>(
        storage: &mut S,
        path: &str,
        extensions: &str,
    ) -> Result<Self, StorageError> {
        let dir = storage.open_dir(path)?;
        let catalog = Self::from_entries(!storage::is_root(path), dir, extensions);
        log(LogCategory::Browser, LogLevel::Debug, || {
            format!(
                "catalog {:?}: {} entries{}",
                path,
                catalog.len(),
                if catalog.truncated { " (truncated)" } else { "" }
            )
        });
        Ok(catalog)
    }

    /// Build from raw entries; the shared core of [`Catalog::build`]
    pub fn from_entries<I>(with_parent: bool, entries: I, extensions: &str) -> Self
    where
        I: IntoIterator<Item = Result<DirEntry, StorageError>>,
    {
        let mut catalog = Catalog::default();
        if with_parent {
            catalog.entries.push(CatalogEntry::parent());
        }

        let mut entries = entries.into_iter();
        loop {
            match entries.next() {
                None => break,
                Some(Err(e)) => {
                    log(LogCategory::Browser, LogLevel::Warn, || {
                        format!("directory listing ended early: {}", e)
                    });
                    break;
                }
                Some(Ok(_)) if catalog.entries.len() >= MAX_ENTRIES => {
                    catalog.truncated = true;
                    log(LogCategory::Browser, LogLevel::Warn, || {
                        format!("more than {} entries, rest dropped", MAX_ENTRIES)
                    });
                    break;
                }
                Some(Ok(entry)) => catalog
                    .entries
                    .push(CatalogEntry::classify(entry, extensions)),
            }
        }

        catalog.entries.sort_by(compare_entries);
        catalog
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether entries were dropped at the cap
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}
