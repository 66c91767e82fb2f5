//! Linear memory.
//!
//! Every access, whether from a guest load or store or from a host callback,
//! goes through [`Memory::check_bounds`]. Addresses are widened to 64 bits
//! before the static offset is added so that `addr + offset` can never wrap.
//! Host code that wants raw access can still use [`Memory::data`] and
//! [`Memory::data_mut`].

use super::{RuntimeError, Trap};
use crate::parser::limits::MAX_MEMORY_PAGES;
use crate::parser::module::Limits;
use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

/// WebAssembly page size in bytes (64KiB)
pub const PAGE_SIZE: usize = 65536;

/// 65536 pages, the whole 32-bit address space.
pub const MAX_PAGES: u32 = MAX_MEMORY_PAGES;

/// A zeroed buffer of `bytes`, or an error when the allocation is refused.
fn zeroed(bytes: usize) -> Result<Vec<u8>, RuntimeError> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| RuntimeError::OutOfMemory { bytes })?;
    data.resize(bytes, 0);
    Ok(data)
}

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    current_pages: u32,
    max_pages: Option<u32>,
}

impl Memory {
    /// Allocates `initial_pages` zeroed pages.
    ///
    /// # Errors
    /// `InvalidLimits` if the initial size exceeds the maximum or either
    /// exceeds 65536 pages, `OutOfMemory` if the host cannot provide the
    /// initial pages.
    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Result<Self, RuntimeError> {
        let limits = Limits {
            min: initial_pages,
            max: max_pages,
        };
        if initial_pages > MAX_PAGES || max_pages.is_some_and(|max| max > MAX_PAGES || max < initial_pages) {
            return Err(RuntimeError::InvalidLimits(limits));
        }
        Ok(Memory {
            data: zeroed(initial_pages as usize * PAGE_SIZE)?,
            current_pages: initial_pages,
            max_pages,
        })
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        self.current_pages
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grows by `delta_pages`, returning the previous size in pages.
    ///
    /// Returns -1 and leaves the memory untouched when the new size would
    /// pass the declared maximum (or 65536 pages without one) or when the
    /// allocation fails.
    pub fn grow(&mut self, delta_pages: u32) -> i32 {
        let current = self.current_pages;
        let Some(new_pages) = current.checked_add(delta_pages) else {
            return -1;
        };
        if new_pages > self.max_pages.unwrap_or(MAX_PAGES) {
            return -1;
        }
        let new_bytes = new_pages as usize * PAGE_SIZE;
        if self.data.try_reserve(new_bytes - self.data.len()).is_err() {
            return -1;
        }
        self.data.resize(new_bytes, 0);
        self.current_pages = new_pages;
        current as i32
    }

    /// Byte range of an access of `len` bytes at `addr`, or a trap if any part
    /// of it falls outside the memory.
    #[inline]
    pub fn check_bounds(&self, addr: u64, len: usize) -> Result<Range<usize>, Trap> {
        let end = addr.checked_add(len as u64).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(addr as usize..end as usize)
    }

    /// Reads `N` bytes at `addr + offset`, the effective address of a load.
    #[inline]
    pub fn load<const N: usize>(&self, addr: u32, offset: u32) -> Result<[u8; N], Trap> {
        let range = self.check_bounds(u64::from(addr) + u64::from(offset), N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[range]);
        Ok(bytes)
    }

    /// Writes `bytes` at `addr + offset`, the effective address of a store.
    #[inline]
    pub fn store(&mut self, addr: u32, offset: u32, bytes: &[u8]) -> Result<(), Trap> {
        let range = self.check_bounds(u64::from(addr) + u64::from(offset), bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<&[u8], Trap> {
        let range = self.check_bounds(u64::from(addr), len as usize)?;
        Ok(&self.data[range])
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Trap> {
        self.store(addr, 0, bytes)
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8, Trap> {
        Ok(self.load::<1>(addr, 0)?[0])
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16, Trap> {
        Ok(LittleEndian::read_u16(&self.load::<2>(addr, 0)?))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, Trap> {
        Ok(LittleEndian::read_u32(&self.load::<4>(addr, 0)?))
    }

    pub fn read_u64(&self, addr: u32) -> Result<u64, Trap> {
        Ok(LittleEndian::read_u64(&self.load::<8>(addr, 0)?))
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Trap> {
        self.store(addr, 0, &[value])
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), Trap> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.store(addr, 0, &buf)
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Trap> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.store(addr, 0, &buf)
    }

    pub fn write_u64(&mut self, addr: u32, value: u64) -> Result<(), Trap> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.store(addr, 0, &buf)
    }

    /// `memory.fill`: sets `len` bytes at `dst` to `value`.
    pub fn fill(&mut self, dst: u32, value: u8, len: u32) -> Result<(), Trap> {
        let range = self.check_bounds(u64::from(dst), len as usize)?;
        self.data[range].fill(value);
        Ok(())
    }

    /// `memory.copy`: overlapping ranges behave as if copied through a buffer.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src = self.check_bounds(u64::from(src), len as usize)?;
        let dst = self.check_bounds(u64::from(dst), len as usize)?;
        self.data.copy_within(src, dst.start);
        Ok(())
    }

    /// `memory.init` and active data segments: copies `len` bytes of `segment`
    /// starting at `src` to `dst`.
    pub fn init(&mut self, dst: u32, segment: &[u8], src: u32, len: u32) -> Result<(), Trap> {
        let src_end = u64::from(src) + u64::from(len);
        if src_end > segment.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let dst = self.check_bounds(u64::from(dst), len as usize)?;
        self.data[dst].copy_from_slice(&segment[src as usize..src_end as usize]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_limits() {
        assert!(Memory::new(2, Some(1)).is_err());
        assert!(Memory::new(MAX_PAGES + 1, None).is_err());
        assert!(Memory::new(0, Some(MAX_PAGES + 1)).is_err());
        assert_eq!(Memory::new(1, Some(1)).unwrap().len(), PAGE_SIZE);
    }

    #[test]
    fn refused_allocation_is_an_error() {
        assert!(matches!(zeroed(usize::MAX), Err(RuntimeError::OutOfMemory { bytes: usize::MAX })));
        assert_eq!(zeroed(16).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn grow_past_max_leaves_size_unchanged() {
        let mut mem = Memory::new(1, Some(2)).unwrap();
        assert_eq!(mem.grow(1), 1);
        assert_eq!(mem.grow(1), -1);
        assert_eq!(mem.size(), 2);
        assert_eq!(mem.len(), 2 * PAGE_SIZE);
        assert_eq!(mem.grow(0), 2);
    }

    #[test]
    fn grown_pages_are_zeroed() {
        let mut mem = Memory::new(0, None).unwrap();
        assert_eq!(mem.read_u8(0), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.grow(1), 0);
        assert_eq!(mem.read_u64(PAGE_SIZE as u32 - 8), Ok(0));
    }

    #[test]
    fn access_straddling_the_end_traps() {
        let mut mem = Memory::new(1, None).unwrap();
        let last = PAGE_SIZE as u32 - 4;
        mem.write_u32(last, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32(last), Ok(0xdead_beef));
        assert_eq!(mem.read_u32(last + 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.load::<4>(u32::MAX, u32::MAX), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.write_bytes(last, &[0; 5]), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn little_endian_layout() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.write_u64(8, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.read_bytes(8, 4).unwrap(), &[8, 7, 6, 5]);
        assert_eq!(mem.read_u16(14), Ok(0x0102));
    }

    #[test]
    fn copy_handles_overlap() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        mem.copy_within(1, 0, 4).unwrap();
        assert_eq!(mem.read_bytes(0, 5).unwrap(), &[1, 1, 2, 3, 4]);
        assert!(mem.copy_within(PAGE_SIZE as u32 - 1, 0, 2).is_err());
    }

    #[test]
    fn init_checks_both_ranges() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.init(10, b"hello", 1, 3).unwrap();
        assert_eq!(mem.read_bytes(10, 3).unwrap(), b"ell");
        assert!(mem.init(0, b"hello", 3, 3).is_err());
        // zero-length at the very end is allowed
        mem.init(PAGE_SIZE as u32, b"", 0, 0).unwrap();
        mem.fill(PAGE_SIZE as u32, 0, 0).unwrap();
    }
}
