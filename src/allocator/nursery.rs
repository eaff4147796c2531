//! Nursery - two equal semispaces in one arena
//!
//! Allocation bumps through the from-space. A minor collection evacuates
//! survivors into the to-space and then flips the roles, leaving the old
//! from-space empty for the next round.

use super::arena::Arena;
use super::space::CellSpace;

#[derive(Debug)]
pub struct NurseryRegion {
    arena: Arena,
    spaces: [CellSpace; 2],
    from: usize,
    poison: bool,
}

impl NurseryRegion {
    /// `semispace_bytes` is the size of ONE semispace; the arena holds two.
    pub fn new(semispace_bytes: usize, cell_size: usize, poison: bool) -> Option<Self> {
        let cells = semispace_bytes / cell_size;
        let half = cells * cell_size;
        let arena = Arena::new(half * 2, cell_size)?;

        let spaces = [
            CellSpace::new(arena.base(), cells, cell_size),
            CellSpace::new(arena.base() + half, cells, cell_size),
        ];

        Some(Self {
            arena,
            spaces,
            from: 0,
            poison,
        })
    }

    /// Space new objects are allocated in
    #[inline]
    pub fn from_space(&self) -> &CellSpace {
        &self.spaces[self.from]
    }

    #[inline]
    pub fn from_space_mut(&mut self) -> &mut CellSpace {
        &mut self.spaces[self.from]
    }

    /// Space survivors are evacuated into
    #[inline]
    pub fn to_space(&self) -> &CellSpace {
        &self.spaces[1 - self.from]
    }

    /// Both spaces at once, `(from, to)`
    pub fn spaces_mut(&mut self) -> (&mut CellSpace, &mut CellSpace) {
        let [first, second] = &mut self.spaces;
        if self.from == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    /// Whole nursery arena, both halves
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.arena.contains(addr)
    }

    #[inline]
    pub fn semispace_cells(&self) -> usize {
        self.spaces[0].capacity_cells()
    }

    #[inline]
    pub fn semispace_bytes(&self) -> usize {
        self.spaces[0].capacity_bytes()
    }

    /// Bump-allocate in the from-space
    #[inline]
    pub fn allocate(&mut self, cells: usize) -> Option<usize> {
        self.from_space_mut().claim(cells)
    }

    /// Swap semispace roles and empty the space just evacuated
    ///
    /// With poisoning on, the evacuated bytes are zeroed so a stale pointer
    /// reads a blank header rather than a plausible object.
    pub fn flip(&mut self) {
        let evacuated = self.from;
        self.from = 1 - self.from;

        let offset = self.spaces[evacuated].base() - self.arena.base();
        let used = self.spaces[evacuated].used_bytes();
        self.spaces[evacuated].reset();

        if self.poison && used > 0 {
            self.arena.zero(offset, used);
        }
    }
}
