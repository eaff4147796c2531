//! Minor collection driver
//!
//! A pointer-flagged value that falls inside the from-space but is not the
//! start of a live object (a misaligned or stale address) is skipped by the
//! mark phase and has no relocation entry. The update phase leaves such
//! values unchanged and counts them in `GcStats::dangling_references`; they
//! were never valid references, so the collection completes.

use super::copy::copy_survivors;
use super::mark::Marker;
use super::roots::{FuncState, RootProvider};
use super::update::Updater;
use super::CollectorState;
use crate::allocator::{CellSpace, ObjectHeader};
use crate::errors::Result;
use crate::heap::Heap;
use crate::logging::{log_gc_complete, log_gc_copy, log_gc_mark, log_gc_start, log_gc_update};
use crate::objects::{self, raw};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug_span, warn};

impl Heap {
    /// Run one minor collection over the current from-space
    ///
    /// On return the semispaces have flipped, every frame register flagged
    /// as a pointer holds its object's new address and the update list is
    /// empty again. Any error is fatal for the core.
    pub(crate) fn collect_minor<R: RootProvider + ?Sized>(&mut self, roots: &mut R) -> Result<()> {
        let cycle = self.stats.minor_collections + 1;
        let span = debug_span!("minor_gc", core = self.core, cycle);
        let _enter = span.enter();

        let started = Instant::now();
        log_gc_start(self.core, cycle, self.allocator.nursery().from_space().used_bytes());

        self.state = CollectorState::Marking;
        let (marked, marked_bytes) = self.mark_phase(roots);
        log_gc_mark(marked, marked_bytes);

        self.state = CollectorState::Copying;
        let outcome = match copy_survivors(&mut self.allocator, &mut self.update_list, self.config.promotion_threshold) {
            Ok(outcome) => outcome,
            Err(kind) => {
                self.state = CollectorState::Idle;
                return Err(self.error(kind));
            }
        };
        debug_assert!(self.update_list.is_sorted());
        log_gc_copy(outcome.copied, outcome.promoted, outcome.reclaimed_bytes);

        self.state = CollectorState::Updating;
        let released = self.release_dead_coroutines();
        let (updated, dangling) = self.update_phase(roots);
        self.rebuild_remembered_set();
        log_gc_update(self.update_list.len(), updated, released);
        if dangling > 0 {
            warn!(dangling, "From-space references without a relocation entry left unchanged");
        }

        self.allocator.nursery_mut().flip();
        self.update_list.clear();
        self.state = CollectorState::Idle;

        let pause_us = started.elapsed().as_micros() as u64;
        let stats = &mut self.stats;
        stats.minor_collections = cycle;
        stats.objects_copied += outcome.copied as u64;
        stats.objects_promoted += outcome.promoted as u64;
        stats.objects_reclaimed += outcome.reclaimed_objects as u64;
        stats.bytes_reclaimed += outcome.reclaimed_bytes as u64;
        stats.last_marked = marked;
        stats.last_survivor_bytes = outcome.survivor_bytes;
        stats.last_pause_us = pause_us;
        stats.total_pause_us += pause_us;
        stats.dangling_references += dangling as u64;

        log_gc_complete(pause_us, outcome.reclaimed_objects, outcome.copied + outcome.promoted);
        Ok(())
    }

    fn mark_phase<R: RootProvider + ?Sized>(&mut self, roots: &mut R) -> (usize, usize) {
        let Heap {
            allocator,
            coroutines,
            remembered,
            temp_roots,
            ..
        } = self;
        let mut marker = Marker::new(allocator.nursery_mut().from_space_mut());

        roots.for_each_frame(&mut |frame: &mut FuncState| frame.for_each_root(|value| marker.mark_value(value)));

        for root in temp_roots.iter() {
            marker.mark_value(root as u64);
        }

        for holder in remembered.iter() {
            let header = unsafe { ObjectHeader::read(holder) };
            if let Some(object_type) = header.object_type() {
                unsafe {
                    objects::for_each_pointer_slot(holder, object_type, |slot| marker.mark_value(raw::read_u64(slot)));
                }
            }
        }

        // Frames of nursery coroutines are traced through their owner instead
        for entry in coroutines.iter() {
            if !marker.covers(entry.owner) {
                entry.frame.for_each_root(|value| marker.mark_value(value));
            }
        }

        marker.drain(coroutines);
        (marker.marked(), marker.marked_bytes())
    }

    fn release_dead_coroutines(&mut self) -> usize {
        let Heap {
            allocator,
            coroutines,
            update_list,
            ..
        } = self;
        let from = allocator.nursery().from_space();

        coroutines.relocate_owners(|owner| {
            if from.in_use(owner) {
                update_list.lookup(owner)
            } else {
                Some(owner)
            }
        })
    }

    fn update_phase<R: RootProvider + ?Sized>(&mut self, roots: &mut R) -> (usize, usize) {
        let Heap {
            allocator,
            coroutines,
            remembered,
            temp_roots,
            update_list,
            ..
        } = self;
        let mut updater = Updater::new(update_list, allocator.nursery().from_space());

        roots.for_each_frame(&mut |frame: &mut FuncState| updater.update_frame(frame));
        temp_roots.update(|value| updater.translate(value));

        for entry in coroutines.iter_mut() {
            updater.update_frame(&mut entry.frame);
        }

        for holder in remembered.iter() {
            let header = unsafe { ObjectHeader::read(holder) };
            if let Some(object_type) = header.object_type() {
                unsafe {
                    objects::for_each_pointer_slot(holder, object_type, |slot| updater.update_slot(slot));
                }
            }
        }

        for (_, moved) in update_list.iter() {
            let header = unsafe { ObjectHeader::read(moved) };
            if let Some(object_type) = header.object_type() {
                unsafe {
                    objects::rebase(moved, object_type);
                    objects::for_each_pointer_slot(moved, object_type, |slot| updater.update_slot(slot));
                }
            }
        }

        (updater.updated(), updater.dangling())
    }

    /// Keep only old objects that still reference the nursery
    ///
    /// Runs before the flip, so the surviving nursery is the to-space.
    fn rebuild_remembered_set(&mut self) {
        let nursery = self.allocator.nursery().to_space();
        let old = self.allocator.old().space();

        let promoted = self.update_list.iter().map(|(_, new)| new).filter(|&new| old.in_use(new));
        let rebuilt: BTreeSet<usize> = self
            .remembered
            .iter()
            .chain(promoted)
            .filter(|&holder| references_into(holder, nursery))
            .collect();

        self.remembered.replace(rebuilt);
    }
}

fn references_into(holder: usize, space: &CellSpace) -> bool {
    let header = unsafe { ObjectHeader::read(holder) };
    let Some(object_type) = header.object_type() else {
        return false;
    };

    let mut found = false;
    unsafe {
        objects::for_each_pointer_slot(holder, object_type, |slot| {
            found |= space.in_use(raw::read_u64(slot) as usize);
        });
    }
    found
}
