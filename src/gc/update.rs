//! Update phase - patch every reference to a relocated object
//!
//! The copy phase walks the from-space in address order, so the update list
//! is sorted by old address by construction and each lookup is a binary
//! search.

use super::roots::FuncState;
use crate::allocator::CellSpace;
use crate::errors::ErrorKind;
use crate::objects::raw;

/// (old address, new address) pairs, ascending by old address
#[derive(Debug, Default)]
pub struct UpdateList {
    entries: Vec<(usize, usize)>,
    capacity: usize,
}

impl UpdateList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a relocation; `old` must exceed every earlier entry
    pub fn push(&mut self, old: usize, new: usize) -> Result<(), ErrorKind> {
        if self.entries.len() >= self.capacity {
            return Err(ErrorKind::UpdateListOverflow { capacity: self.capacity });
        }
        debug_assert!(self.entries.last().map_or(true, |&(last, _)| last < old), "update list out of order");
        self.entries.push((old, new));
        Ok(())
    }

    #[inline]
    pub fn lookup(&self, old: usize) -> Option<usize> {
        self.entries
            .binary_search_by_key(&old, |&(from, _)| from)
            .ok()
            .map(|index| self.entries[index].1)
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|pair| pair[0].0 < pair[1].0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Translates from-space addresses through an update list
pub(crate) struct Updater<'a> {
    list: &'a UpdateList,
    from_start: usize,
    from_end: usize,
    updated: usize,
    dangling: usize,
}

impl<'a> Updater<'a> {
    pub(crate) fn new(list: &'a UpdateList, from: &CellSpace) -> Self {
        Self {
            list,
            from_start: from.base(),
            from_end: from.base() + from.used_bytes(),
            updated: 0,
            dangling: 0,
        }
    }

    /// New address for a relocated object; anything else is returned as is
    #[inline]
    pub(crate) fn translate(&mut self, value: u64) -> u64 {
        let addr = value as usize;
        if addr < self.from_start || addr >= self.from_end {
            return value;
        }
        match self.list.lookup(addr) {
            Some(new) => {
                self.updated += 1;
                new as u64
            }
            None => {
                self.dangling += 1;
                value
            }
        }
    }

    /// # Safety
    /// `slot` must be an aligned reference word inside a live object.
    #[inline]
    pub(crate) unsafe fn update_slot(&mut self, slot: usize) {
        let value = raw::read_u64(slot);
        let translated = self.translate(value);
        if translated != value {
            raw::write_u64(slot, translated);
        }
    }

    pub(crate) fn update_frame(&mut self, frame: &mut FuncState) {
        frame.update_roots(|value| self.translate(value));
    }

    pub(crate) fn updated(&self) -> usize {
        self.updated
    }

    /// From-space references with no relocation entry
    pub(crate) fn dangling(&self) -> usize {
        self.dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hits_and_misses() {
        let mut list = UpdateList::with_capacity(8);
        list.push(0x100, 0x9100).unwrap();
        list.push(0x140, 0x9120).unwrap();
        list.push(0x400, 0x7000).unwrap();

        assert!(list.is_sorted());
        assert_eq!(list.lookup(0x140), Some(0x9120));
        assert_eq!(list.lookup(0x400), Some(0x7000));
        assert_eq!(list.lookup(0x120), None);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut list = UpdateList::with_capacity(2);
        list.push(1, 10).unwrap();
        list.push(2, 20).unwrap();
        assert_eq!(list.push(3, 30), Err(ErrorKind::UpdateListOverflow { capacity: 2 }));

        list.clear();
        assert!(list.push(3, 30).is_ok());
    }
}
