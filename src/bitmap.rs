//! Cell bitmaps - per-cell state for a region
//!
//! Design: Two dense bit vectors sit beside every cell space:
//! 1. `CellBitmap`: one bit per cell, set while the cell belongs to a live allocation
//! 2. `ColorBitmap`: two bits per cell, the tri-color mark state of the object starting there
//!
//! Both are sized once at region creation and never reallocate.

use bitvec::prelude::*;
use serde::Serialize;

/// Tri-color mark state
///
/// Encoded as two bits: White = 00, Gray = 01, Black = 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Color {
    /// Not yet reached
    White = 0,
    /// Reached, children pending
    Gray = 1,
    /// Reached, children scanned
    Black = 2,
}

impl Color {
    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Color::Gray,
            2 => Color::Black,
            _ => Color::White,
        }
    }

    #[inline]
    pub const fn to_raw(self) -> u8 {
        self as u8
    }

    #[inline]
    const fn from_bits(low: bool, high: bool) -> Self {
        match (high, low) {
            (true, _) => Color::Black,
            (false, true) => Color::Gray,
            (false, false) => Color::White,
        }
    }

    /// (low, high) bit pair
    #[inline]
    const fn bits(self) -> (bool, bool) {
        match self {
            Color::White => (false, false),
            Color::Gray => (true, false),
            Color::Black => (false, true),
        }
    }
}

/// One bit per cell
#[derive(Debug, Clone)]
pub struct CellBitmap {
    bits: BitVec<u64, Lsb0>,
}

impl CellBitmap {
    pub fn new(cells: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, cells),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Out-of-range cells read as unset
    #[inline]
    pub fn get(&self, cell: usize) -> bool {
        self.bits.get(cell).map_or(false, |bit| *bit)
    }

    #[inline]
    pub fn set(&mut self, cell: usize, value: bool) {
        self.bits.set(cell, value);
    }

    pub fn set_range(&mut self, start: usize, count: usize, value: bool) {
        self.bits[start..start + count].fill(value);
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }
}

/// Two bits per cell
#[derive(Debug, Clone)]
pub struct ColorBitmap {
    bits: BitVec<u64, Lsb0>,
}

impl ColorBitmap {
    pub fn new(cells: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, cells * 2),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len() / 2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn get(&self, cell: usize) -> Color {
        Color::from_bits(self.bits[cell * 2], self.bits[cell * 2 + 1])
    }

    #[inline]
    pub fn set(&mut self, cell: usize, color: Color) {
        let (low, high) = color.bits();
        self.bits.set(cell * 2, low);
        self.bits.set(cell * 2 + 1, high);
    }

    pub fn set_range(&mut self, start: usize, count: usize, color: Color) {
        if color == Color::White {
            self.bits[start * 2..(start + count) * 2].fill(false);
            return;
        }
        for cell in start..start + count {
            self.set(cell, color);
        }
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    /// Number of cells currently holding `color`
    pub fn count(&self, color: Color) -> usize {
        (0..self.len()).filter(|&cell| self.get(cell) == color).count()
    }
}
