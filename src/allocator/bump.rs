//! Bump cursor allocation - O(1) fast path
//!
//! Design: Positions are whole cells, not bytes. The owning space turns a
//! claimed cell index into an address, so the cursor never sees pointers.

/// Bump cursor state - minimal overhead
#[derive(Debug, Clone)]
pub struct BumpAllocator {
    next: usize,
    limit: usize,
}

impl BumpAllocator {
    /// Cursor over `limit` cells, starting at cell 0
    #[inline]
    pub const fn new(limit: usize) -> Self {
        Self { next: 0, limit }
    }

    /// Fast path: claim `cells` contiguous cells
    ///
    /// Returns the first claimed cell, or None when the space is exhausted
    /// (caller handles the slow path).
    #[inline(always)]
    pub fn try_claim(&mut self, cells: usize) -> Option<usize> {
        let start = self.next;
        let end = start.checked_add(cells)?;

        if end <= self.limit {
            self.next = end;
            Some(start)
        } else {
            None
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Cells handed out since the last reset
    #[inline]
    pub fn used(&self) -> usize {
        self.next
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.next
    }
}

/// Whole cells needed to hold `bytes`
#[inline(always)]
pub const fn cells_for(bytes: usize, cell_size: usize) -> usize {
    bytes / cell_size + (bytes % cell_size != 0) as usize
}
