//! Arena management - OS memory acquisition
//!
//! Design: One zeroed block per region, acquired once at heap creation and
//! released only when the heap is dropped. Regions never grow.

use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Arena metadata - tracks one OS-allocated memory region
pub struct Arena {
    start: *mut u8,
    layout: Layout,
}

// Safety: the arena exclusively owns its block; the pointer is never shared
// outside the heap that owns the arena.
unsafe impl Send for Arena {}

impl Arena {
    /// Allocate a zeroed arena from the OS
    ///
    /// Returns None for a zero size, a bad alignment or an allocator failure.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align.max(8)).ok()?;

        let start = unsafe { alloc_zeroed(layout) };
        if start.is_null() {
            return None;
        }

        Some(Self { start, layout })
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.start as usize
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.base() + self.size()
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.end()
    }

    /// Fill `len` bytes at `offset` with zeroes
    pub fn zero(&mut self, offset: usize, len: usize) {
        assert!(offset + len <= self.size(), "zero range outside arena");
        unsafe {
            core::ptr::write_bytes(self.start.add(offset), 0, len);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.start, self.layout);
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_is_zeroed_and_aligned() {
        let arena = Arena::new(4096, 64).unwrap();
        assert_eq!(arena.base() % 64, 0);
        let bytes = unsafe { core::slice::from_raw_parts(arena.base() as *const u8, 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_arena_contains() {
        let arena = Arena::new(128, 16).unwrap();
        assert!(arena.contains(arena.base()));
        assert!(arena.contains(arena.end() - 1));
        assert!(!arena.contains(arena.end()));
        assert!(!arena.contains(0));
    }

    #[test]
    fn test_zero_sized_arena_refused() {
        assert!(Arena::new(0, 8).is_none());
    }

    #[test]
    fn test_zero_range() {
        let mut arena = Arena::new(64, 8).unwrap();
        unsafe { core::ptr::write_bytes(arena.base() as *mut u8, 0xAB, 64) };
        arena.zero(8, 16);
        let bytes = unsafe { core::slice::from_raw_parts(arena.base() as *const u8, 64) };
        assert!(bytes[8..24].iter().all(|&b| b == 0));
        assert_eq!(bytes[7], 0xAB);
        assert_eq!(bytes[24], 0xAB);
    }
}
