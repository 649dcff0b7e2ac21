use super::{components, file_name, DirEntry, FileStat, Storage, StorageError};
use std::fs::{self, File, ReadDir};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Storage backed by a host directory that plays the role of the card root.
#[derive(Debug, Clone)]
pub struct HostStorage {
    root: PathBuf,
}

impl HostStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a card path under the root. Only plain names are joined, so `..`,
    /// `.` and host separators inside a component never leave the root.
    fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in components(path) {
            for part in Path::new(component).components() {
                if let Component::Normal(name) = part {
                    resolved.push(name);
                }
            }
        }
        resolved
    }

    fn map_err(path: &str, err: std::io::Error) -> StorageError {
        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::io(path, err),
        }
    }
}

/// Directory iterator over a host directory
pub struct HostDir {
    path: String,
    inner: ReadDir,
}

impl Iterator for HostDir {
    type Item = Result<DirEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(
            entry
                .and_then(|e| {
                    let meta = e.metadata()?;
                    Ok(DirEntry {
                        name: e.file_name().to_string_lossy().into_owned(),
                        is_dir: meta.is_dir(),
                        size: if meta.is_dir() { 0 } else { meta.len() },
                    })
                })
                .map_err(|e| StorageError::io(&self.path, e)),
        )
    }
}

impl Storage for HostStorage {
    type Dir = HostDir;
    type Reader = File;
    type Writer = File;

    fn open_dir(&mut self, path: &str) -> Result<HostDir, StorageError> {
        let host = self.resolve(path);
        if host.is_file() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let inner = fs::read_dir(&host).map_err(|e| Self::map_err(path, e))?;
        Ok(HostDir {
            path: path.to_string(),
            inner,
        })
    }

    fn stat(&mut self, path: &str) -> Result<FileStat, StorageError> {
        let meta = fs::metadata(self.resolve(path)).map_err(|e| Self::map_err(path, e))?;
        Ok(FileStat {
            name: file_name(path).to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
        })
    }

    fn open(&mut self, path: &str) -> Result<File, StorageError> {
        let host = self.resolve(path);
        if host.is_dir() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        File::open(host).map_err(|e| Self::map_err(path, e))
    }

    fn create(&mut self, path: &str) -> Result<File, StorageError> {
        File::create(self.resolve(path)).map_err(|e| Self::map_err(path, e))
    }

    fn mkdir(&mut self, path: &str) -> Result<(), StorageError> {
        let host = self.resolve(path);
        if host.is_dir() {
            return Ok(());
        }
        fs::create_dir(host).map_err(|e| Self::map_err(path, e))
    }
}
