//! Sorted field tables shared by structs and classes
//!
//! A table is three parallel arrays living inside the object: global ids
//! (u32, ascending), byte offsets into the data block (u32) and a pointer
//! bitmask. Slot `i` in all three describes the same field.

use super::raw::{self, align8, bitmask_words, checked_align8};
use super::search::{find_global_index, insertion_point};
use crate::errors::{ErrorKind, Result};
use crate::heap::Heap;

/// Addresses of the three arrays and the data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldPlacement {
    pub globals: usize,
    pub offsets: usize,
    pub bitmask: usize,
    pub data: usize,
}

/// View over a field table stored in an object
#[derive(Debug, Clone, Copy)]
pub struct FieldTable {
    defined: usize,
    capacity: usize,
    globals: usize,
    offsets: usize,
    bitmask: usize,
    data: usize,
    data_size: usize,
}

impl FieldTable {
    /// Table bytes for `capacity` fields, excluding the data block
    pub(crate) fn table_bytes(capacity: usize) -> Option<usize> {
        let ids = checked_align8(capacity.checked_mul(4)?)?;
        ids.checked_mul(2)?.checked_add(bitmask_words(capacity).checked_mul(8)?)
    }

    /// Lay the arrays out back to back from `start`, data block last
    pub(crate) const fn placement(start: usize, capacity: usize) -> FieldPlacement {
        let globals = start;
        let offsets = globals + align8(4 * capacity);
        let bitmask = offsets + align8(4 * capacity);
        let data = bitmask + 8 * bitmask_words(capacity);
        FieldPlacement { globals, offsets, bitmask, data }
    }

    /// `defined` is the address of the word counting defined fields.
    ///
    /// # Safety
    /// Every address must describe tables inside one live object.
    pub(crate) unsafe fn new(defined: usize, capacity: usize, placement: FieldPlacement, data_size: usize) -> Self {
        Self {
            defined,
            capacity,
            globals: placement.globals,
            offsets: placement.offsets,
            bitmask: placement.bitmask,
            data: placement.data,
            data_size,
        }
    }

    #[inline]
    pub(crate) fn defined(&self) -> usize {
        unsafe { raw::read_u64(self.defined) as usize }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub(crate) fn global_ids(&self) -> &[u32] {
        unsafe { raw::u32_slice(self.globals, self.defined()) }
    }

    #[inline]
    pub(crate) fn find(&self, global_id: u32) -> Option<usize> {
        find_global_index(self.global_ids(), global_id)
    }

    #[inline]
    pub(crate) fn offset(&self, slot: usize) -> usize {
        unsafe { raw::read_u32(self.offsets + 4 * slot) as usize }
    }

    #[inline]
    pub(crate) fn is_pointer(&self, slot: usize) -> bool {
        unsafe { raw::test_bit(self.bitmask, slot) }
    }

    /// Insert a field, keeping ids ascending; returns its slot
    pub(crate) fn define(&self, global_id: u32, offset: usize, is_pointer: bool) -> std::result::Result<usize, ErrorKind> {
        let defined = self.defined();
        if defined >= self.capacity {
            return Err(ErrorKind::invalid_layout(format!("all {} field slots are defined", self.capacity)));
        }
        if offset > u32::MAX as usize {
            return Err(ErrorKind::invalid_layout(format!("field offset {} does not fit the offset table", offset)));
        }
        if is_pointer {
            if offset % 8 != 0 || offset + 8 > self.data_size {
                return Err(ErrorKind::invalid_layout(format!(
                    "pointer field at offset {} must be 8-byte aligned inside {} data bytes",
                    offset, self.data_size
                )));
            }
        } else if offset >= self.data_size {
            return Err(ErrorKind::invalid_layout(format!(
                "field offset {} outside {} data bytes",
                offset, self.data_size
            )));
        }
        if self.find(global_id).is_some() {
            return Err(ErrorKind::invalid_layout(format!("global id {} defined twice", global_id)));
        }

        let slot = insertion_point(self.global_ids(), global_id);
        unsafe {
            for i in (slot..defined).rev() {
                raw::write_u32(self.globals + 4 * (i + 1), raw::read_u32(self.globals + 4 * i));
                raw::write_u32(self.offsets + 4 * (i + 1), raw::read_u32(self.offsets + 4 * i));
                raw::assign_bit(self.bitmask, i + 1, raw::test_bit(self.bitmask, i));
            }
            raw::write_u32(self.globals + 4 * slot, global_id);
            raw::write_u32(self.offsets + 4 * slot, offset as u32);
            raw::assign_bit(self.bitmask, slot, is_pointer);
            if is_pointer {
                // Stale scalar bytes must not be traced as a reference
                raw::write_u64(self.data + offset, 0);
            }
            raw::write_u64(self.defined, (defined + 1) as u64);
        }
        Ok(slot)
    }

    /// Visit the address of every pointer-flagged field
    pub(crate) fn for_each_pointer_slot(&self, mut visit: impl FnMut(usize)) {
        for slot in 0..self.defined() {
            if self.is_pointer(slot) {
                visit(self.data + self.offset(slot));
            }
        }
    }

    fn check_range(&self, slot: usize, len: usize) -> std::result::Result<usize, ErrorKind> {
        let offset = self.offset(slot);
        if offset.checked_add(len).map_or(true, |end| end > self.data_size) {
            return Err(ErrorKind::invalid_layout(format!(
                "{} bytes at offset {} run past {} data bytes",
                len, offset, self.data_size
            )));
        }
        Ok(offset)
    }

    pub(crate) fn read_bytes(&self, slot: usize, len: usize) -> std::result::Result<Vec<u8>, ErrorKind> {
        let offset = self.check_range(slot, len)?;
        Ok(unsafe { raw::read_bytes(self.data + offset, len) })
    }

    /// Scalar write; refuses to touch any byte of a pointer field
    pub(crate) fn write_bytes(&self, slot: usize, bytes: &[u8]) -> std::result::Result<(), ErrorKind> {
        if self.is_pointer(slot) {
            return Err(ErrorKind::invalid_layout("scalar write to a pointer field"));
        }
        let offset = self.check_range(slot, bytes.len())?;
        let end = offset + bytes.len();
        for other in 0..self.defined() {
            let start = self.offset(other);
            if self.is_pointer(other) && start < end && offset < start + 8 {
                return Err(ErrorKind::invalid_layout(format!(
                    "scalar write [{}, {}) overlaps pointer field at {}",
                    offset, end, start
                )));
            }
        }
        unsafe { raw::write_bytes(self.data + offset, bytes) };
        Ok(())
    }

    /// Address of a pointer field's word
    pub(crate) fn pointer_address(&self, slot: usize) -> std::result::Result<usize, ErrorKind> {
        if !self.is_pointer(slot) {
            return Err(ErrorKind::invalid_layout("pointer access to a scalar field"));
        }
        Ok(self.data + self.offset(slot))
    }
}

/// Named-field access shared by structs and classes
///
/// Field names are global ids; an id the object does not define is a fatal
/// `AttributeNotFound`.
pub trait FieldAccess: Copy {
    fn address(self) -> usize;

    #[doc(hidden)]
    fn field_table(self, heap: &Heap) -> Result<FieldTable>;

    /// Declare the field `global_id` at `offset` in the data block
    fn define_field(self, heap: &mut Heap, global_id: u32, offset: usize, is_pointer: bool) -> Result<usize> {
        let table = self.field_table(heap)?;
        table.define(global_id, offset, is_pointer).map_err(|kind| heap.error(kind))
    }

    /// Local slot of a field; ascending global-id order
    fn field_slot(self, heap: &Heap, global_id: u32) -> Result<usize> {
        self.field_table(heap)?
            .find(global_id)
            .ok_or_else(|| heap.error(ErrorKind::AttributeNotFound { global_id }))
    }

    fn field_ids(self, heap: &Heap) -> Result<Vec<u32>> {
        Ok(self.field_table(heap)?.global_ids().to_vec())
    }

    fn field_capacity(self, heap: &Heap) -> Result<usize> {
        Ok(self.field_table(heap)?.capacity())
    }

    fn data_size(self, heap: &Heap) -> Result<usize> {
        Ok(self.field_table(heap)?.data_size())
    }

    fn field_is_pointer(self, heap: &Heap, global_id: u32) -> Result<bool> {
        let slot = self.field_slot(heap, global_id)?;
        Ok(self.field_table(heap)?.is_pointer(slot))
    }

    fn read_field_bytes(self, heap: &Heap, global_id: u32, len: usize) -> Result<Vec<u8>> {
        let slot = self.field_slot(heap, global_id)?;
        self.field_table(heap)?.read_bytes(slot, len).map_err(|kind| heap.error(kind))
    }

    /// Eight bytes at the field, native endian
    fn read_field(self, heap: &Heap, global_id: u32) -> Result<u64> {
        let bytes = self.read_field_bytes(heap, global_id, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes);
        Ok(u64::from_ne_bytes(word))
    }

    fn write_field_bytes(self, heap: &mut Heap, global_id: u32, bytes: &[u8]) -> Result<()> {
        let slot = self.field_slot(heap, global_id)?;
        self.field_table(heap)?.write_bytes(slot, bytes).map_err(|kind| heap.error(kind))
    }

    fn write_field(self, heap: &mut Heap, global_id: u32, value: u64) -> Result<()> {
        self.write_field_bytes(heap, global_id, &value.to_ne_bytes())
    }

    fn read_pointer_field(self, heap: &Heap, global_id: u32) -> Result<usize> {
        let slot = self.field_slot(heap, global_id)?;
        let addr = self.field_table(heap)?.pointer_address(slot).map_err(|kind| heap.error(kind))?;
        Ok(unsafe { raw::read_u64(addr) as usize })
    }

    /// Store a reference; 0 is null
    fn write_pointer_field(self, heap: &mut Heap, global_id: u32, target: usize) -> Result<()> {
        let slot = self.field_slot(heap, global_id)?;
        let addr = self.field_table(heap)?.pointer_address(slot).map_err(|kind| heap.error(kind))?;
        heap.check_reference(target)?;
        unsafe { raw::write_u64(addr, target as u64) };
        heap.write_barrier(self.address(), target);
        Ok(())
    }
}
