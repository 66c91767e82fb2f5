//! The virtual file table behind `path_open`, `fd_read` and `fd_write`.
//!
//! Nothing here touches the host filesystem. Each path maps to a record with
//! a fixed descriptor number and optional read/write callbacks supplied by
//! the embedder.

use super::types::{Filestat, WasiFileType};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Produces up to `n` bytes for a read of `n` bytes in total.
pub type ReadCallback = Rc<dyn Fn(usize) -> Vec<u8>>;
/// Receives the gathered bytes of one `fd_write`.
pub type WriteCallback = Rc<dyn Fn(&[u8])>;

#[derive(Clone)]
pub struct VirtualFile {
    fd: u32,
    filetype: WasiFileType,
    size: u64,
    reader: Option<ReadCallback>,
    writer: Option<WriteCallback>,
}

impl VirtualFile {
    /// A regular file reporting `size` bytes in its filestat.
    pub fn regular(fd: u32, size: u64) -> Self {
        Self {
            fd,
            filetype: WasiFileType::RegularFile,
            size,
            reader: None,
            writer: None,
        }
    }

    pub fn directory(fd: u32) -> Self {
        Self {
            filetype: WasiFileType::Directory,
            ..Self::regular(fd, 0)
        }
    }

    /// A read-only regular file served sequentially from `bytes`.
    pub fn rom(fd: u32, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let size = bytes.len() as u64;
        let cursor = Cell::new(0usize);
        Self::regular(fd, size).reader(move |n| {
            let start = cursor.get().min(bytes.len());
            let end = start.saturating_add(n).min(bytes.len());
            cursor.set(end);
            bytes[start..end].to_vec()
        })
    }

    pub fn reader<F>(mut self, read: F) -> Self
    where
        F: Fn(usize) -> Vec<u8> + 'static,
    {
        self.reader = Some(Rc::new(read));
        self
    }

    pub fn writer<F>(mut self, write: F) -> Self
    where
        F: Fn(&[u8]) + 'static,
    {
        self.writer = Some(Rc::new(write));
        self
    }

    pub fn fd(&self) -> u32 {
        self.fd
    }

    pub fn filetype(&self) -> WasiFileType {
        self.filetype
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn filestat(&self) -> Filestat {
        Filestat {
            filetype: self.filetype,
            size: self.size,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.reader.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Asks the reader for `total` bytes. Anything it returns beyond
    /// `total` is dropped; `None` if the file has no reader.
    pub fn read(&self, total: usize) -> Option<Vec<u8>> {
        let reader = self.reader.as_ref()?;
        let mut bytes = reader(total);
        bytes.truncate(total);
        Some(bytes)
    }

    /// Hands `bytes` to the writer; `false` if the file has none.
    pub fn write(&self, bytes: &[u8]) -> bool {
        match &self.writer {
            Some(writer) => {
                writer(bytes);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("fd", &self.fd)
            .field("filetype", &self.filetype)
            .field("size", &self.size)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// Path to record mapping, with a reverse index by descriptor.
#[derive(Debug, Clone, Default)]
pub struct VirtualFileTable {
    files: HashMap<String, VirtualFile>,
    by_fd: HashMap<u32, String>,
}

impl VirtualFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `path`, replacing any earlier record for the
    /// same path or descriptor.
    pub fn insert(&mut self, path: impl Into<String>, file: VirtualFile) {
        let path = path.into();
        if let Some(old) = self.files.remove(&path) {
            log::debug!("virtual file {path:?} replaced (fd {} -> {})", old.fd, file.fd);
            self.by_fd.remove(&old.fd);
        }
        if let Some(other) = self.by_fd.insert(file.fd, path.clone()) {
            log::debug!("fd {} moved from {other:?} to {path:?}", file.fd);
            self.files.remove(&other);
        }
        self.files.insert(path, file);
    }

    pub fn get(&self, path: &str) -> Option<&VirtualFile> {
        self.files.get(path)
    }

    pub fn by_fd(&self, fd: u32) -> Option<&VirtualFile> {
        self.by_fd.get(&fd).and_then(|path| self.files.get(path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
