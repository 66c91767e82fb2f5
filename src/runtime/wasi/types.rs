//! WASI data types and their guest memory layouts.
//!
//! See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md>

use std::fmt;

/// Status codes returned to the guest by every WASI call.
///
/// These are data, not Rust errors: a call that fails with one of them still
/// returns normally to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WasiErrno {
    /// No error occurred.
    Success = 0,
    /// Bad file descriptor.
    BadF = 8,
    /// A guest pointer was outside linear memory.
    Fault = 21,
    /// Invalid argument.
    Inval = 28,
    /// I/O error.
    Io = 29,
}

impl WasiErrno {
    /// Convert to u32 for WASI return values
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<WasiErrno> for u32 {
    fn from(errno: WasiErrno) -> u32 {
        errno as u32
    }
}

/// WASI file types
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#filetype>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WasiFileType {
    /// The type of the file is unknown.
    Unknown = 0,
    /// A directory inode.
    Directory = 3,
    /// A regular file inode.
    RegularFile = 4,
}

/// The two import namespaces the bridge answers to. They differ only in the
/// `filestat` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Unstable,
    Preview1,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Unstable, Namespace::Preview1];

    pub fn module_name(self) -> &'static str {
        match self {
            Namespace::Unstable => "wasi_unstable",
            Namespace::Preview1 => "wasi_snapshot_preview1",
        }
    }

    /// Size in bytes of a `filestat` record in this namespace.
    pub fn filestat_size(self) -> usize {
        match self {
            Namespace::Unstable => 56,
            Namespace::Preview1 => 64,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

/// The metadata `path_filestat_get` reports for a virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filestat {
    pub filetype: WasiFileType,
    pub size: u64,
}

impl Filestat {
    /// Encodes the record for `namespace`. Device and inode are always 1,
    /// the link count is 1 and all timestamps are zero.
    ///
    /// `wasi_unstable`: dev u64, ino u64, filetype u8 (+3 pad), nlink u32,
    /// size u64, atim, mtim, ctim.
    /// `wasi_snapshot_preview1`: dev u64, ino u64, filetype u8 (+7 pad),
    /// nlink u64, size u64, atim, mtim, ctim.
    pub fn encode(&self, namespace: Namespace) -> Vec<u8> {
        let mut buf = vec![0u8; namespace.filestat_size()];
        buf[0..8].copy_from_slice(&1u64.to_le_bytes());
        buf[8..16].copy_from_slice(&1u64.to_le_bytes());
        buf[16] = self.filetype as u8;
        match namespace {
            Namespace::Unstable => {
                buf[20..24].copy_from_slice(&1u32.to_le_bytes());
                buf[24..32].copy_from_slice(&self.size.to_le_bytes());
            }
            Namespace::Preview1 => {
                buf[24..32].copy_from_slice(&1u64.to_le_bytes());
                buf[32..40].copy_from_slice(&self.size.to_le_bytes());
            }
        }
        buf
    }
}

/// Size of an `iovec`/`ciovec`: a u32 buffer pointer and a u32 length.
pub const IOVEC_SIZE: u32 = 8;
/// Size of a `subscription` record read by `poll_oneoff`.
pub const SUBSCRIPTION_SIZE: u32 = 48;
/// Size of an `event` record written by `poll_oneoff`.
pub const EVENT_SIZE: u32 = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(WasiErrno::Success.as_u32(), 0);
        assert_eq!(WasiErrno::BadF.as_u32(), 8);
        assert_eq!(WasiErrno::Fault.as_u32(), 21);
        assert_eq!(WasiErrno::Inval.as_u32(), 28);
    }

    #[test]
    fn filestat_layouts() {
        let stat = Filestat { filetype: WasiFileType::RegularFile, size: 0x1234 };

        let old = stat.encode(Namespace::Unstable);
        assert_eq!(old.len(), 56);
        assert_eq!(old[16], 4);
        assert_eq!(&old[20..24], &[1, 0, 0, 0]);
        assert_eq!(&old[24..32], &0x1234u64.to_le_bytes());
        assert!(old[32..].iter().all(|&b| b == 0));

        let new = stat.encode(Namespace::Preview1);
        assert_eq!(new.len(), 64);
        assert_eq!(&new[24..32], &1u64.to_le_bytes());
        assert_eq!(&new[32..40], &0x1234u64.to_le_bytes());
        assert!(new[40..].iter().all(|&b| b == 0));
    }
}
