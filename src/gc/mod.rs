//! Garbage collection - generational copying for one core
//!
//! Design: Stop-the-world minor collection in three phases:
//! 1. Marking (tri-color worklist from frames, temporary roots and remembered objects)
//! 2. Copying (address-ordered evacuation, promotion after repeated survival)
//! 3. Updating (binary search through the update list, then table rebase)
//!
//! A collection only ever runs inside an allocation that found the nursery
//! full; callers never trigger one directly.

mod collector;
mod copy;
mod mark;
mod roots;
mod update;


pub use roots::{CallStack, FuncState, RememberedSet, RootIdx, RootProvider, Slot, TempRoots, REGISTER_COUNT};
pub use update::UpdateList;

use serde::Serialize;

/// Phase of the (at most one) collection running on a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CollectorState {
    Idle,
    Marking,
    Copying,
    Updating,
}

/// Collection statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub minor_collections: u64,
    pub objects_allocated: u64,
    pub bytes_allocated: u64,
    pub objects_copied: u64,
    pub objects_promoted: u64,
    pub objects_reclaimed: u64,
    pub bytes_reclaimed: u64,
    /// Objects marked by the most recent collection
    pub last_marked: usize,
    /// Nursery bytes surviving the most recent collection
    pub last_survivor_bytes: usize,
    pub last_pause_us: u64,
    pub total_pause_us: u64,
    pub nursery_used_bytes: usize,
    pub nursery_capacity_bytes: usize,
    pub old_used_bytes: usize,
    pub old_capacity_bytes: usize,
    pub remembered_objects: usize,
    pub coroutine_frames: usize,
    /// Pointer-flagged values into the from-space that named no object
    pub dangling_references: u64,
}
