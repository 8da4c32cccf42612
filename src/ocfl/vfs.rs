//! Abstraction over the storage backend. All paths are `/` separated and relative to the
//! backend's root; `.` denotes the root itself. Implementations must create parent
//! directories on write and must make writes atomic with respect to readers of the final
//! path.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::ocfl::error::{OcflError, Result};

/// An open file handle. The caller owns the handle and drops it to close.
pub trait VfsFile: Read + Seek + Send {
    fn size(&self) -> u64;
}

/// A single directory entry
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// The filesystem contract the library consumes. Implementations may be a local directory,
/// an object store, or an in-memory map.
pub trait Vfs: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile>>;

    /// Reads the file at `path` into the sink, returning the number of bytes copied
    fn read(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut file = self.open(path)?;
        io::copy(&mut file, sink).map_err(|e| OcflError::io("read", path, e))
    }

    /// Lists a directory. A missing or empty directory yields an empty vector.
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Writes the reader's bytes to `path`, creating parent directories as needed
    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Removes a file. Removing a file that does not exist is not an error.
    fn remove(&self, path: &str) -> Result<()>;

    /// Recursively removes a directory. Removing one that does not exist is not an error.
    fn remove_all(&self, path: &str) -> Result<()>;

    /// Copies a file within the backend. The default implementation streams through memory;
    /// backends that can copy natively should override it.
    fn copy(&self, dst: &str, src: &str) -> Result<u64> {
        let mut file = self.open(src)?;
        self.write(dst, &mut file)
    }
}

/// Joins two `/` separated path parts. Either part may be empty or `.`.
pub fn join(parent: &str, child: &str) -> String {
    let parent = if parent == "." { "" } else { parent };
    let child = if child == "." { "" } else { child };

    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

// ================ Local filesystem ================

/// `Vfs` over a directory on the local filesystem
pub struct LocalFs {
    root: PathBuf,
}

struct LocalFile {
    file: File,
    size: u64,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl LocalFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn physical(&self, path: &str) -> PathBuf {
        if path.is_empty() || path == "." {
            self.root.clone()
        } else {
            let mut full = self.root.clone();
            for segment in path.split('/') {
                full.push(segment);
            }
            full
        }
    }
}

impl VfsFile for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Vfs for LocalFs {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile>> {
        let physical = self.physical(path);
        let file = File::open(&physical).map_err(|e| OcflError::io("open", path, e))?;
        let size = file
            .metadata()
            .map_err(|e| OcflError::io("stat", path, e))?
            .len();
        Ok(Box::new(LocalFile { file, size }))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let physical = self.physical(path);

        let iter = match fs::read_dir(&physical) {
            Ok(iter) => iter,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OcflError::io("list", path, e)),
        };

        let mut entries = Vec::new();

        for entry in iter {
            let entry = entry.map_err(|e| OcflError::io("list", path, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| OcflError::io("stat", path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.physical(path).exists())
    }

    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let physical = self.physical(path);

        let parent = physical
            .parent()
            .ok_or_else(|| OcflError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| OcflError::io("create directories for", path, e))?;

        // Write to a sibling temp file and rename it into place so that readers of the
        // final path never observe a partial write.
        let temp = parent.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| -> Result<u64> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)
                .map_err(|e| OcflError::io("write", path, e))?;

            let written = io::copy(reader, &mut file).map_err(|e| OcflError::io("write", path, e))?;
            file.flush().map_err(|e| OcflError::io("write", path, e))?;
            drop(file);

            fs::rename(&temp, &physical).map_err(|e| OcflError::io("write", path, e))?;
            Ok(written)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }

        result
    }

    fn remove(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.physical(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OcflError::io("remove", path, e)),
        }
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.physical(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OcflError::io("remove", path, e)),
        }
    }

    fn copy(&self, dst: &str, src: &str) -> Result<u64> {
        let physical_dst = self.physical(dst);

        if let Some(parent) = physical_dst.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| OcflError::io("create directories for", dst, e))?;
        }

        fs::copy(self.physical(src), physical_dst).map_err(|e| OcflError::io("copy", src, e))
    }
}

// ================ In-memory filesystem ================

/// `Vfs` over an in-memory map. Directories are implied by the file paths they contain.
pub struct MemFs {
    files: RwLock<BTreeMap<String, Arc<Vec<u8>>>>,
}

struct MemFile {
    cursor: Cursor<Vec<u8>>,
    size: u64,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    fn normalize(path: &str) -> &str {
        if path == "." {
            ""
        } else {
            path
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsFile for MemFile {
    fn size(&self) -> u64 {
        self.size
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Vfs for MemFs {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile>> {
        let path = Self::normalize(path);
        let files = self.files.read().unwrap();

        match files.get(path) {
            Some(bytes) => Ok(Box::new(MemFile {
                size: bytes.len() as u64,
                cursor: Cursor::new(bytes.as_ref().clone()),
            })),
            None => Err(OcflError::io(
                "open",
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = Self::normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let files = self.files.read().unwrap();
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();

        for key in files.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if rest.is_empty() {
                    continue;
                }
                match rest.find('/') {
                    Some(i) => {
                        entries.insert(rest[..i].to_string(), true);
                    }
                    None => {
                        entries.entry(rest.to_string()).or_insert(false);
                    }
                }
            }
        }

        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize(path);
        if path.is_empty() {
            return Ok(true);
        }

        let files = self.files.read().unwrap();
        let prefix = format!("{path}/");
        Ok(files.contains_key(path) || files.keys().any(|k| k.starts_with(&prefix)))
    }

    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let path = Self::normalize(path);
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| OcflError::io("write", path, e))?;

        let written = bytes.len() as u64;
        self.files
            .write()
            .unwrap()
            .insert(path.to_string(), Arc::new(bytes));
        Ok(written)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.files.write().unwrap().remove(Self::normalize(path));
        Ok(())
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        let path = Self::normalize(path);
        let prefix = format!("{path}/");
        self.files
            .write()
            .unwrap()
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }
}
