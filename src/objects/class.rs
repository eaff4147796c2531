//! Class objects - structs with a method table and a class id
//!
//! ```text
//! header          32 bytes
//! num_methods     u64
//! defined_methods u64
//! num_attrs       u64
//! defined_attrs   u64
//! class_id        u64
//! data_size       u64
//! 6 addresses     methods, method ids, globals, offsets, mask, data
//! methods         [u64; num_methods]   code addresses
//! method ids      [u32; num_methods]   ascending, padded to 8
//! attribute table same shape as a struct's field table
//! data            data_size bytes, padded to 8
//! ```

use super::fields::{FieldAccess, FieldPlacement, FieldTable};
use super::raw::{self, align8, checked_align8};
use super::search::{find_global_index, insertion_point};
use crate::allocator::{ObjectType, HEADER_SIZE};
use crate::errors::{ErrorKind, Result};
use crate::heap::Heap;

const NUM_METHODS: usize = HEADER_SIZE;
const DEFINED_METHODS: usize = HEADER_SIZE + 8;
const NUM_ATTRS: usize = HEADER_SIZE + 16;
const DEFINED_ATTRS: usize = HEADER_SIZE + 24;
const CLASS_ID: usize = HEADER_SIZE + 32;
const DATA_SIZE: usize = HEADER_SIZE + 40;
const METHODS: usize = HEADER_SIZE + 48;
const GLOBAL_METHODS: usize = HEADER_SIZE + 56;
const GLOBAL_FIELDS: usize = HEADER_SIZE + 64;
const FIELD_OFFSETS: usize = HEADER_SIZE + 72;
const POINTER_MASK: usize = HEADER_SIZE + 80;
const DATA: usize = HEADER_SIZE + 88;
const TABLES: usize = HEADER_SIZE + 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    pub method_count: usize,
    pub attr_count: usize,
    pub data_size: usize,
    pub class_id: u32,
}

impl ClassLayout {
    pub const fn new(method_count: usize, attr_count: usize, data_size: usize, class_id: u32) -> Self {
        Self { method_count, attr_count, data_size, class_id }
    }

    fn method_bytes(method_count: usize) -> Option<usize> {
        let ids = checked_align8(method_count.checked_mul(4)?)?;
        method_count.checked_mul(8)?.checked_add(ids)
    }

    /// None when the size does not fit in a `usize`
    pub fn total_size(&self) -> Option<usize> {
        TABLES
            .checked_add(Self::method_bytes(self.method_count)?)?
            .checked_add(FieldTable::table_bytes(self.attr_count)?)?
            .checked_add(checked_align8(self.data_size)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(pub(crate) usize);

impl ClassRef {
    pub fn from_address(heap: &Heap, addr: usize) -> Result<Self> {
        heap.check(addr, ObjectType::Class)?;
        Ok(Self(addr))
    }

    /// # Safety
    /// `addr` must be freshly allocated, zeroed memory of `layout.total_size()` bytes.
    pub(crate) unsafe fn init(addr: usize, layout: &ClassLayout) -> Self {
        raw::write_u64(addr + NUM_METHODS, layout.method_count as u64);
        raw::write_u64(addr + DEFINED_METHODS, 0);
        raw::write_u64(addr + NUM_ATTRS, layout.attr_count as u64);
        raw::write_u64(addr + DEFINED_ATTRS, 0);
        raw::write_u64(addr + CLASS_ID, layout.class_id as u64);
        raw::write_u64(addr + DATA_SIZE, layout.data_size as u64);
        Self::rebase(addr);
        Self(addr)
    }

    /// # Safety
    /// `addr` must be a class object.
    pub(crate) unsafe fn rebase(addr: usize) {
        let methods = raw::read_u64(addr + NUM_METHODS) as usize;
        let attrs = raw::read_u64(addr + NUM_ATTRS) as usize;

        let method_table = addr + TABLES;
        let method_ids = method_table + 8 * methods;
        let placement = FieldTable::placement(method_ids + align8(4 * methods), attrs);

        raw::write_u64(addr + METHODS, method_table as u64);
        raw::write_u64(addr + GLOBAL_METHODS, method_ids as u64);
        raw::write_u64(addr + GLOBAL_FIELDS, placement.globals as u64);
        raw::write_u64(addr + FIELD_OFFSETS, placement.offsets as u64);
        raw::write_u64(addr + POINTER_MASK, placement.bitmask as u64);
        raw::write_u64(addr + DATA, placement.data as u64);
    }

    /// # Safety
    /// `addr` must be a class object.
    pub(crate) unsafe fn table_at(addr: usize) -> FieldTable {
        let placement = FieldPlacement {
            globals: raw::read_u64(addr + GLOBAL_FIELDS) as usize,
            offsets: raw::read_u64(addr + FIELD_OFFSETS) as usize,
            bitmask: raw::read_u64(addr + POINTER_MASK) as usize,
            data: raw::read_u64(addr + DATA) as usize,
        };
        FieldTable::new(
            addr + DEFINED_ATTRS,
            raw::read_u64(addr + NUM_ATTRS) as usize,
            placement,
            raw::read_u64(addr + DATA_SIZE) as usize,
        )
    }

    pub fn class_id(self, heap: &Heap) -> Result<u32> {
        heap.check(self.0, ObjectType::Class)?;
        Ok(unsafe { raw::read_u64(self.0 + CLASS_ID) as u32 })
    }

    pub fn method_capacity(self, heap: &Heap) -> Result<usize> {
        heap.check(self.0, ObjectType::Class)?;
        Ok(unsafe { raw::read_u64(self.0 + NUM_METHODS) as usize })
    }

    /// Global method ids in slot order
    pub fn method_ids(self, heap: &Heap) -> Result<Vec<u32>> {
        heap.check(self.0, ObjectType::Class)?;
        Ok(self.method_id_table().to_vec())
    }

    fn method_id_table(&self) -> &[u32] {
        unsafe {
            raw::u32_slice(
                raw::read_u64(self.0 + GLOBAL_METHODS) as usize,
                raw::read_u64(self.0 + DEFINED_METHODS) as usize,
            )
        }
    }

    /// Bind `global_id` to a code address; returns the method slot
    pub fn define_method(self, heap: &mut Heap, global_id: u32, code_address: u64) -> Result<usize> {
        heap.check(self.0, ObjectType::Class)?;
        let capacity = unsafe { raw::read_u64(self.0 + NUM_METHODS) as usize };
        let defined = unsafe { raw::read_u64(self.0 + DEFINED_METHODS) as usize };

        if defined >= capacity {
            return Err(heap.error(ErrorKind::invalid_layout(format!("all {} method slots are defined", capacity))));
        }
        if find_global_index(self.method_id_table(), global_id).is_some() {
            return Err(heap.error(ErrorKind::invalid_layout(format!("method id {} defined twice", global_id))));
        }

        let slot = insertion_point(self.method_id_table(), global_id);
        unsafe {
            let methods = raw::read_u64(self.0 + METHODS) as usize;
            let ids = raw::read_u64(self.0 + GLOBAL_METHODS) as usize;
            for i in (slot..defined).rev() {
                raw::write_u64(methods + 8 * (i + 1), raw::read_u64(methods + 8 * i));
                raw::write_u32(ids + 4 * (i + 1), raw::read_u32(ids + 4 * i));
            }
            raw::write_u64(methods + 8 * slot, code_address);
            raw::write_u32(ids + 4 * slot, global_id);
            raw::write_u64(self.0 + DEFINED_METHODS, (defined + 1) as u64);
        }
        Ok(slot)
    }

    /// Code address bound to `global_id`; a miss is fatal `MethodNotFound`
    pub fn find_method(self, heap: &Heap, global_id: u32) -> Result<u64> {
        heap.check(self.0, ObjectType::Class)?;
        let slot = find_global_index(self.method_id_table(), global_id)
            .ok_or_else(|| heap.error(ErrorKind::MethodNotFound { global_id }))?;
        Ok(unsafe { raw::read_u64(raw::read_u64(self.0 + METHODS) as usize + 8 * slot) })
    }

    pub fn has_method(self, heap: &Heap, global_id: u32) -> Result<bool> {
        heap.check(self.0, ObjectType::Class)?;
        Ok(find_global_index(self.method_id_table(), global_id).is_some())
    }
}

impl FieldAccess for ClassRef {
    #[inline]
    fn address(self) -> usize {
        self.0
    }

    fn field_table(self, heap: &Heap) -> Result<FieldTable> {
        heap.check(self.0, ObjectType::Class)?;
        Ok(unsafe { Self::table_at(self.0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_size() {
        // 128 fixed, 2 methods: 16 + 8, 1 attr: 8 + 8 + 8, 8 data
        assert_eq!(ClassLayout::new(2, 1, 8, 7).total_size(), Some(128 + 24 + 24 + 8));
    }

    #[test]
    fn test_layout_size_overflow() {
        assert_eq!(ClassLayout::new(usize::MAX / 8, 0, 0, 1).total_size(), None);
        assert_eq!(ClassLayout::new(0, usize::MAX / 4, 0, 1).total_size(), None);
        assert_eq!(ClassLayout::new(1, 1, usize::MAX - 100, 1).total_size(), None);
    }

    #[test]
    fn test_rebase_orders_tables() {
        let layout = ClassLayout::new(3, 2, 16, 11);
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        unsafe {
            ClassRef::init(addr, &layout);
            let methods = raw::read_u64(addr + METHODS) as usize;
            let ids = raw::read_u64(addr + GLOBAL_METHODS) as usize;
            let globals = raw::read_u64(addr + GLOBAL_FIELDS) as usize;
            let data = raw::read_u64(addr + DATA) as usize;

            assert_eq!(methods, addr + TABLES);
            assert_eq!(ids, methods + 24);
            assert_eq!(globals, ids + 16);
            assert_eq!(data + 16, addr + layout.total_size().unwrap());
            assert_eq!(raw::read_u64(addr + CLASS_ID), 11);
        }
    }
}
