//! Memory allocator - cell-granular bump allocation
//!
//! Design: Two regions with different lifetimes:
//! 1. Nursery (two semispaces, bump allocation, emptied by every minor GC)
//! 2. Old generation (append-only, receives promoted survivors)
//!
//! No object is ever freed individually. Nursery space comes back when the
//! semispaces flip; old-generation space never comes back.

mod arena;
mod bump;
mod header;
mod nursery;
mod old_gen;
mod space;


pub use arena::Arena;
pub use bump::{cells_for, BumpAllocator};
pub use header::{Location, ObjectHeader, ObjectType, HEADER_SIZE};
pub use nursery::NurseryRegion;
pub use old_gen::OldGenerationRegion;
pub use space::CellSpace;

use crate::config::HeapConfig;
use crate::errors::ErrorKind;
use crate::objects::raw;
use serde::Serialize;

/// High-level allocator owning both generations
#[derive(Debug)]
pub struct Allocator {
    nursery: NurseryRegion,
    old: OldGenerationRegion,
    cell_size: usize,
}

impl Allocator {
    pub fn new(config: &HeapConfig) -> Result<Self, ErrorKind> {
        let nursery = NurseryRegion::new(config.nursery_bytes, config.cell_size, config.poison_reclaimed)
            .ok_or(ErrorKind::NurseryExhausted {
                requested: config.nursery_bytes * 2,
                available: 0,
            })?;
        let old = OldGenerationRegion::new(config.old_generation_bytes, config.cell_size).ok_or(
            ErrorKind::OldGenerationExhausted {
                requested: config.old_generation_bytes,
                capacity: 0,
            },
        )?;

        Ok(Self {
            nursery,
            old,
            cell_size: config.cell_size,
        })
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    pub fn cells_for(&self, bytes: usize) -> usize {
        cells_for(bytes, self.cell_size)
    }

    /// Fast path: claim from-space cells, zero them, write the header
    ///
    /// Returns None when the from-space is exhausted (caller collects).
    pub fn try_allocate(&mut self, object_type: ObjectType, total_size: usize, uid: u64) -> Option<usize> {
        debug_assert!(total_size >= HEADER_SIZE);
        let cells = self.cells_for(total_size);
        let addr = self.nursery.allocate(cells)?;

        unsafe {
            raw::zero(addr, cells * self.cell_size);
            ObjectHeader::write(addr, ObjectHeader::new(object_type, total_size, uid));
        }
        Some(addr)
    }

    #[inline]
    pub fn nursery(&self) -> &NurseryRegion {
        &self.nursery
    }

    #[inline]
    pub fn nursery_mut(&mut self) -> &mut NurseryRegion {
        &mut self.nursery
    }

    #[inline]
    pub fn old(&self) -> &OldGenerationRegion {
        &self.old
    }

    /// Both regions at once, for the copy phase
    #[inline]
    pub fn regions_mut(&mut self) -> (&mut NurseryRegion, &mut OldGenerationRegion) {
        (&mut self.nursery, &mut self.old)
    }

    /// Allocated part of the current from-space
    #[inline]
    pub fn in_nursery(&self, addr: usize) -> bool {
        self.nursery.from_space().in_use(addr)
    }

    /// Allocated part of the old generation
    #[inline]
    pub fn in_old(&self, addr: usize) -> bool {
        self.old.space().in_use(addr)
    }

    /// Header of the live object starting exactly at `addr`
    ///
    /// None unless `addr` is a cell boundary in a live region, the cell is
    /// active and the header names a known object type.
    pub fn object_at(&self, addr: usize) -> Option<ObjectHeader> {
        let space = if self.in_nursery(addr) {
            self.nursery.from_space()
        } else if self.in_old(addr) {
            self.old.space()
        } else {
            return None;
        };

        if !space.is_cell_aligned(addr) || !space.is_active(space.cell_of(addr)) {
            return None;
        }

        let header = unsafe { ObjectHeader::read(addr) };
        header.object_type()?;
        if header.total_size() < HEADER_SIZE || !space.in_use(addr + header.total_size() - 1) {
            return None;
        }
        Some(header)
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            cell_size: self.cell_size,
            nursery_used_bytes: self.nursery.from_space().used_bytes(),
            nursery_capacity_bytes: self.nursery.semispace_bytes(),
            old_used_bytes: self.old.used_bytes(),
            old_capacity_bytes: self.old.capacity_bytes(),
        }
    }
}

/// Allocator statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    pub cell_size: usize,
    pub nursery_used_bytes: usize,
    pub nursery_capacity_bytes: usize,
    pub old_used_bytes: usize,
    pub old_capacity_bytes: usize,
}
