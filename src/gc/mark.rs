//! Mark phase - tri-color marking over the from-space
//!
//! Only from-space objects are colored. References into the old generation
//! or outside the heap end the walk; the old generation is never traced
//! except through roots and remembered objects.
//!
//! Gray objects sit on an explicit worklist, so deep object graphs cannot
//! overflow the native stack.

use crate::allocator::{CellSpace, ObjectHeader, ObjectType};
use crate::bitmap::Color;
use crate::objects::{self, raw, CoroutineRef, CoroutineTable};
use tracing::warn;

pub(crate) struct Marker<'a> {
    from: &'a mut CellSpace,
    worklist: Vec<usize>,
    marked: usize,
    marked_bytes: usize,
}

impl<'a> Marker<'a> {
    pub(crate) fn new(from: &'a mut CellSpace) -> Self {
        Self {
            from,
            worklist: Vec::with_capacity(256),
            marked: 0,
            marked_bytes: 0,
        }
    }

    /// Allocated part of the space being marked
    #[inline]
    pub(crate) fn covers(&self, addr: usize) -> bool {
        self.from.in_use(addr)
    }

    /// Shade a white from-space object gray and queue it
    pub(crate) fn mark_value(&mut self, value: u64) {
        let addr = value as usize;
        if !self.from.in_use(addr) {
            return;
        }
        if !self.from.is_cell_aligned(addr) {
            warn!(address = format_args!("{:#x}", addr), "Reference into the middle of a cell ignored");
            return;
        }
        let cell = self.from.cell_of(addr);
        if !self.from.is_active(cell) {
            warn!(address = format_args!("{:#x}", addr), "Reference to an inactive cell ignored");
            return;
        }
        if self.from.color(cell) != Color::White {
            return;
        }

        self.shade(addr, cell, Color::Gray);
        self.worklist.push(addr);
    }

    fn shade(&mut self, addr: usize, cell: usize, color: Color) {
        self.from.set_color(cell, color);
        unsafe { ObjectHeader::at(addr).set_color(color) };
    }

    /// Scan gray objects until none are left
    pub(crate) fn drain(&mut self, coroutines: &CoroutineTable) {
        while let Some(addr) = self.worklist.pop() {
            let header = unsafe { ObjectHeader::read(addr) };
            let Some(object_type) = header.object_type() else {
                warn!(address = format_args!("{:#x}", addr), "Gray object with unknown type");
                continue;
            };

            unsafe {
                objects::for_each_pointer_slot(addr, object_type, |slot| self.mark_value(raw::read_u64(slot)));
            }
            if object_type == ObjectType::Coroutine {
                let slot = unsafe { CoroutineRef::slot_at(addr) };
                if let Some(entry) = coroutines.get(slot) {
                    entry.frame.for_each_root(|value| self.mark_value(value));
                }
            }

            let cell = self.from.cell_of(addr);
            self.shade(addr, cell, Color::Black);
            self.marked += 1;
            self.marked_bytes += header.total_size();
        }
    }

    pub(crate) fn marked(&self) -> usize {
        self.marked
    }

    pub(crate) fn marked_bytes(&self) -> usize {
        self.marked_bytes
    }
}
