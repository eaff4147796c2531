//! Old generation - append-only region for promoted objects
//!
//! Nothing is ever reclaimed here; the capacity fixed at creation is a hard
//! ceiling.

use super::arena::Arena;
use super::space::CellSpace;

#[derive(Debug)]
pub struct OldGenerationRegion {
    arena: Arena,
    space: CellSpace,
}

impl OldGenerationRegion {
    pub fn new(capacity_bytes: usize, cell_size: usize) -> Option<Self> {
        let cells = capacity_bytes / cell_size;
        let arena = Arena::new(cells * cell_size, cell_size)?;
        let space = CellSpace::new(arena.base(), cells, cell_size);
        Some(Self { arena, space })
    }

    #[inline]
    pub fn space(&self) -> &CellSpace {
        &self.space
    }

    #[inline]
    pub fn space_mut(&mut self) -> &mut CellSpace {
        &mut self.space
    }

    /// Append `cells` cells; None once the ceiling is reached
    #[inline]
    pub fn claim(&mut self, cells: usize) -> Option<usize> {
        self.space.claim(cells)
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.arena.contains(addr)
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.space.used_bytes()
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.space.capacity_bytes()
    }
}
