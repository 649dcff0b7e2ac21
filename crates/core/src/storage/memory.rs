use super::{components, file_name, DirEntry, FileStat, Storage, StorageError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::rc::Rc;

#[derive(Debug)]
enum Node {
    /// Child names in creation order (the order the directory iterates in)
    Dir(Vec<String>),
    File {
        data: Vec<u8>,
        /// Reads past this many bytes fail
        fail_after: Option<usize>,
    },
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Node>,
}

fn key(path: &str) -> String {
    components(path).collect::<Vec<_>>().join("\\")
}

fn parent_key(key: &str) -> &str {
    key.rfind('\\').map_or("", |idx| &key[..idx])
}

impl Tree {
    fn insert(&mut self, key: String, node: Node) -> Result<(), StorageError> {
        if key.is_empty() {
            return Ok(());
        }
        let parent = parent_key(&key).to_string();
        if !self.nodes.contains_key(&parent) {
            self.insert(parent.clone(), Node::Dir(Vec::new()))?;
        }
        let name = file_name(&key).to_string();
        match self.nodes.get_mut(&parent) {
            Some(Node::Dir(children)) => {
                if !children.contains(&name) {
                    children.push(name);
                }
            }
            _ => return Err(StorageError::NotADirectory(parent)),
        }
        self.nodes.insert(key, node);
        Ok(())
    }
}

/// In-memory storage. Clones share the same tree, so a test can keep a
/// handle while a component owns another.
#[derive(Debug, Clone)]
pub struct MemStorage {
    tree: Rc<RefCell<Tree>>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(String::new(), Node::Dir(Vec::new()));
        Self {
            tree: Rc::new(RefCell::new(Tree { nodes })),
        }
    }

    /// Create (or replace) a file, creating missing parent directories
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let node = Node::File {
            data: data.into(),
            fail_after: None,
        };
        // A file path under an existing file is a test setup mistake
        if let Err(e) = self.tree.borrow_mut().insert(key(path), node) {
            panic!("MemStorage::add_file({}): {}", path, e);
        }
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.tree.borrow_mut();
        let key = key(path);
        if !tree.nodes.contains_key(&key) {
            if let Err(e) = tree.insert(key, Node::Dir(Vec::new())) {
                panic!("MemStorage::add_dir({}): {}", path, e);
            }
        }
    }

    /// Make reads of `path` fail once `bytes` bytes have been delivered
    pub fn fail_reads_after(&self, path: &str, bytes: usize) {
        if let Some(Node::File { fail_after, .. }) = self.tree.borrow_mut().nodes.get_mut(&key(path)) {
            *fail_after = Some(bytes);
        }
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree.borrow().nodes.get(&key(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.borrow().nodes.contains_key(&key(path))
    }
}

/// Snapshot of a directory's entries
pub struct MemDir {
    entries: std::vec::IntoIter<DirEntry>,
}

impl Iterator for MemDir {
    type Item = Result<DirEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(Ok)
    }
}

/// Reader over a snapshot of a file's contents
pub struct MemReader {
    data: Vec<u8>,
    pos: usize,
    fail_after: Option<usize>,
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.fail_after {
            Some(limit) if self.pos >= limit => {
                return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
            }
            Some(limit) => limit.min(self.data.len()),
            None => self.data.len(),
        };
        let n = buf.len().min(limit - self.pos.min(limit));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writer appending to a file in the shared tree
pub struct MemWriter {
    tree: Rc<RefCell<Tree>>,
    key: String,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.tree.borrow_mut().nodes.get_mut(&self.key) {
            Some(Node::File { data, .. }) => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "file was removed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for MemStorage {
    type Dir = MemDir;
    type Reader = MemReader;
    type Writer = MemWriter;

    fn open_dir(&mut self, path: &str) -> Result<MemDir, StorageError> {
        let tree = self.tree.borrow();
        let dir_key = key(path);
        let children = match tree.nodes.get(&dir_key) {
            Some(Node::Dir(children)) => children,
            Some(Node::File { .. }) => return Err(StorageError::NotADirectory(path.to_string())),
            None => return Err(StorageError::NotFound(path.to_string())),
        };
        let entries = children
            .iter()
            .filter_map(|name| {
                let child = if dir_key.is_empty() {
                    name.clone()
                } else {
                    format!("{}\\{}", dir_key, name)
                };
                tree.nodes.get(&child).map(|node| match node {
                    Node::Dir(_) => DirEntry {
                        name: name.clone(),
                        is_dir: true,
                        size: 0,
                    },
                    Node::File { data, .. } => DirEntry {
                        name: name.clone(),
                        is_dir: false,
                        size: data.len() as u64,
                    },
                })
            })
            .collect::<Vec<_>>();
        Ok(MemDir {
            entries: entries.into_iter(),
        })
    }

    fn stat(&mut self, path: &str) -> Result<FileStat, StorageError> {
        match self.tree.borrow().nodes.get(&key(path)) {
            Some(Node::Dir(_)) => Ok(FileStat {
                name: file_name(path).to_string(),
                size: 0,
                is_dir: true,
            }),
            Some(Node::File { data, .. }) => Ok(FileStat {
                name: file_name(path).to_string(),
                size: data.len() as u64,
                is_dir: false,
            }),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    fn open(&mut self, path: &str) -> Result<MemReader, StorageError> {
        match self.tree.borrow().nodes.get(&key(path)) {
            Some(Node::File { data, fail_after }) => Ok(MemReader {
                data: data.clone(),
                pos: 0,
                fail_after: *fail_after,
            }),
            Some(Node::Dir(_)) => Err(StorageError::IsADirectory(path.to_string())),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    fn create(&mut self, path: &str) -> Result<MemWriter, StorageError> {
        let file_key = key(path);
        let mut tree = self.tree.borrow_mut();
        match tree.nodes.get(parent_key(&file_key)) {
            Some(Node::Dir(_)) => {}
            _ => return Err(StorageError::NotFound(path.to_string())),
        }
        if let Some(Node::Dir(_)) = tree.nodes.get(&file_key) {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        tree.insert(
            file_key.clone(),
            Node::File {
                data: Vec::new(),
                fail_after: None,
            },
        )?;
        Ok(MemWriter {
            tree: Rc::clone(&self.tree),
            key: file_key,
        })
    }

    fn mkdir(&mut self, path: &str) -> Result<(), StorageError> {
        let dir_key = key(path);
        let mut tree = self.tree.borrow_mut();
        match tree.nodes.get(&dir_key) {
            Some(Node::Dir(_)) => return Ok(()),
            Some(Node::File { .. }) => return Err(StorageError::NotADirectory(path.to_string())),
            None => {}
        }
        match tree.nodes.get(parent_key(&dir_key)) {
            Some(Node::Dir(_)) => tree.insert(dir_key, Node::Dir(Vec::new())),
            _ => Err(StorageError::NotFound(path.to_string())),
        }
    }
}
