//! Struct objects - structurally typed records
//!
//! ```text
//! header        32 bytes
//! num_fields    u64
//! defined       u64   fields declared so far
//! data_size     u64
//! 4 addresses   globals, offsets, mask, data (inside this object)
//! globals       [u32; num_fields], ascending, padded to 8
//! offsets       [u32; num_fields], padded to 8
//! mask          [u64; ceil(num_fields / 64)]
//! data          data_size bytes, padded to 8
//! ```
//!
//! The four stored addresses point back into the object itself and are
//! recomputed whenever the object moves.

use super::fields::{FieldAccess, FieldTable};
use super::raw::{self, checked_align8};
use crate::allocator::{ObjectType, HEADER_SIZE};
use crate::errors::Result;
use crate::heap::Heap;

const NUM_FIELDS: usize = HEADER_SIZE;
const DEFINED_FIELDS: usize = HEADER_SIZE + 8;
const DATA_SIZE: usize = HEADER_SIZE + 16;
const GLOBAL_FIELDS: usize = HEADER_SIZE + 24;
const FIELD_OFFSETS: usize = HEADER_SIZE + 32;
const POINTER_MASK: usize = HEADER_SIZE + 40;
const DATA: usize = HEADER_SIZE + 48;
const TABLES: usize = HEADER_SIZE + 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructLayout {
    pub field_count: usize,
    pub data_size: usize,
}

impl StructLayout {
    pub const fn new(field_count: usize, data_size: usize) -> Self {
        Self { field_count, data_size }
    }

    /// Bytes including header, tables and data block; None when the
    /// size does not fit in a `usize`
    pub fn total_size(&self) -> Option<usize> {
        TABLES
            .checked_add(FieldTable::table_bytes(self.field_count)?)?
            .checked_add(checked_align8(self.data_size)?)
    }
}

/// Handle to a struct object
///
/// A plain address: it goes stale when a collection moves the object, so
/// long-lived handles must be kept in registers or temporary roots and
/// re-read afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructRef(pub(crate) usize);

impl StructRef {
    pub fn from_address(heap: &Heap, addr: usize) -> Result<Self> {
        heap.check(addr, ObjectType::Struct)?;
        Ok(Self(addr))
    }

    /// # Safety
    /// `addr` must be freshly allocated, zeroed memory of `layout.total_size()` bytes.
    pub(crate) unsafe fn init(addr: usize, layout: &StructLayout) -> Self {
        raw::write_u64(addr + NUM_FIELDS, layout.field_count as u64);
        raw::write_u64(addr + DEFINED_FIELDS, 0);
        raw::write_u64(addr + DATA_SIZE, layout.data_size as u64);
        Self::rebase(addr);
        Self(addr)
    }

    /// Recompute the internal table addresses for the object at `addr`
    ///
    /// # Safety
    /// `addr` must be a struct object.
    pub(crate) unsafe fn rebase(addr: usize) {
        let capacity = raw::read_u64(addr + NUM_FIELDS) as usize;
        let placement = FieldTable::placement(addr + TABLES, capacity);
        raw::write_u64(addr + GLOBAL_FIELDS, placement.globals as u64);
        raw::write_u64(addr + FIELD_OFFSETS, placement.offsets as u64);
        raw::write_u64(addr + POINTER_MASK, placement.bitmask as u64);
        raw::write_u64(addr + DATA, placement.data as u64);
    }

    /// # Safety
    /// `addr` must be a struct object.
    pub(crate) unsafe fn table_at(addr: usize) -> FieldTable {
        let placement = super::fields::FieldPlacement {
            globals: raw::read_u64(addr + GLOBAL_FIELDS) as usize,
            offsets: raw::read_u64(addr + FIELD_OFFSETS) as usize,
            bitmask: raw::read_u64(addr + POINTER_MASK) as usize,
            data: raw::read_u64(addr + DATA) as usize,
        };
        FieldTable::new(
            addr + DEFINED_FIELDS,
            raw::read_u64(addr + NUM_FIELDS) as usize,
            placement,
            raw::read_u64(addr + DATA_SIZE) as usize,
        )
    }
}

impl FieldAccess for StructRef {
    #[inline]
    fn address(self) -> usize {
        self.0
    }

    fn field_table(self, heap: &Heap) -> Result<FieldTable> {
        heap.check(self.0, ObjectType::Struct)?;
        Ok(unsafe { Self::table_at(self.0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_size() {
        // 88 fixed + 2 x align8(12) + 8 mask + 24 data
        assert_eq!(StructLayout::new(3, 20).total_size(), Some(88 + 32 + 8 + 24));
        assert_eq!(StructLayout::new(0, 0).total_size(), Some(88));
    }

    #[test]
    fn test_layout_size_overflow() {
        assert_eq!(StructLayout::new(0, usize::MAX - 40).total_size(), None);
        assert_eq!(StructLayout::new(1, usize::MAX - 90).total_size(), None);
        assert_eq!(StructLayout::new(usize::MAX / 2, 0).total_size(), None);
    }

    #[test]
    fn test_rebase_points_into_object() {
        let layout = StructLayout::new(5, 40);
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        unsafe {
            StructRef::init(addr, &layout);
            let table = StructRef::table_at(addr);
            assert_eq!(table.capacity(), 5);
            assert_eq!(table.defined(), 0);
            assert_eq!(raw::read_u64(addr + GLOBAL_FIELDS) as usize, addr + TABLES);
            assert_eq!(raw::read_u64(addr + DATA) as usize, addr + layout.total_size().unwrap() - 40);
        }
    }

    #[test]
    fn test_define_keeps_ids_sorted() {
        let layout = StructLayout::new(4, 32);
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        unsafe {
            StructRef::init(addr, &layout);
            let table = StructRef::table_at(addr);
            table.define(30, 0, false).unwrap();
            table.define(10, 8, true).unwrap();
            table.define(20, 16, false).unwrap();

            assert_eq!(table.global_ids(), &[10, 20, 30]);
            assert_eq!(table.offset(0), 8);
            assert!(table.is_pointer(0));
            assert!(!table.is_pointer(1));
            assert_eq!(table.offset(2), 0);
        }
    }

    #[test]
    fn test_define_rejects_bad_fields() {
        let layout = StructLayout::new(2, 16);
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        unsafe {
            StructRef::init(addr, &layout);
            let table = StructRef::table_at(addr);
            assert!(table.define(1, 4, true).is_err());
            assert!(table.define(1, 16, false).is_err());
            table.define(1, 0, false).unwrap();
            assert!(table.define(1, 8, false).is_err());
            table.define(2, 8, true).unwrap();
            assert!(table.define(3, 0, false).is_err());
        }
    }

    #[test]
    fn test_pointer_field_starts_null() {
        let layout = StructLayout::new(2, 16);
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        unsafe {
            StructRef::init(addr, &layout);
            let table = StructRef::table_at(addr);
            let scalar = table.define(1, 0, false).unwrap();
            table.write_bytes(scalar, &0x4000_1000u64.to_ne_bytes()).unwrap();

            let pointer = table.define(2, 0, true).unwrap();
            let word = table.pointer_address(pointer).unwrap();
            assert_eq!(raw::read_u64(word), 0);

            let mut traced = Vec::new();
            table.for_each_pointer_slot(|slot| traced.push(raw::read_u64(slot)));
            assert_eq!(traced, vec![0]);
        }
    }
}
