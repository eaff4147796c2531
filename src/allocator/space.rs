//! Cell space - a run of fixed-size cells with its bitmaps
//!
//! Both nursery semispaces and the old generation are cell spaces; they
//! differ only in who resets them and when.

use super::bump::BumpAllocator;
use crate::bitmap::{CellBitmap, Color, ColorBitmap};

#[derive(Debug)]
pub struct CellSpace {
    base: usize,
    cell_size: usize,
    cell_shift: u32,
    cursor: BumpAllocator,
    active: CellBitmap,
    colors: ColorBitmap,
}

impl CellSpace {
    /// `cell_size` must be a power of two
    pub(crate) fn new(base: usize, cells: usize, cell_size: usize) -> Self {
        debug_assert!(cell_size.is_power_of_two());
        Self {
            base,
            cell_size,
            cell_shift: cell_size.trailing_zeros(),
            cursor: BumpAllocator::new(cells),
            active: CellBitmap::new(cells),
            colors: ColorBitmap::new(cells),
        }
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    pub fn capacity_cells(&self) -> usize {
        self.cursor.limit()
    }

    #[inline]
    pub fn used_cells(&self) -> usize {
        self.cursor.used()
    }

    #[inline]
    pub fn free_cells(&self) -> usize {
        self.cursor.remaining()
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_cells() << self.cell_shift
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_cells() << self.cell_shift
    }

    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_cells() << self.cell_shift
    }

    /// Address range reserved for this space
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.capacity_bytes()
    }

    /// Address range claimed since the last reset
    #[inline]
    pub fn in_use(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.used_bytes()
    }

    #[inline]
    pub fn is_cell_aligned(&self, addr: usize) -> bool {
        (addr - self.base) & (self.cell_size - 1) == 0
    }

    /// Caller guarantees `contains(addr)`
    #[inline]
    pub fn cell_of(&self, addr: usize) -> usize {
        (addr - self.base) >> self.cell_shift
    }

    #[inline]
    pub fn address_of(&self, cell: usize) -> usize {
        self.base + (cell << self.cell_shift)
    }

    /// Claim `cells` cells, marking them active and white
    pub fn claim(&mut self, cells: usize) -> Option<usize> {
        let cell = self.cursor.try_claim(cells)?;
        self.active.set_range(cell, cells, true);
        self.colors.set_range(cell, cells, Color::White);
        Some(self.address_of(cell))
    }

    #[inline]
    pub fn is_active(&self, cell: usize) -> bool {
        self.active.get(cell)
    }

    #[inline]
    pub fn color(&self, cell: usize) -> Color {
        self.colors.get(cell)
    }

    #[inline]
    pub fn set_color(&mut self, cell: usize, color: Color) {
        self.colors.set(cell, color);
    }

    pub fn active_cells(&self) -> usize {
        self.active.count_ones()
    }

    pub fn cells_with(&self, color: Color) -> usize {
        self.colors.count(color)
    }

    /// Forget every claim: cursor to zero, all cells inactive and white
    pub fn reset(&mut self) {
        self.cursor.reset();
        self.active.clear_all();
        self.colors.clear_all();
    }
}
