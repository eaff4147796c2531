//! Copy phase - evacuate black objects, promote long-lived ones
//!
//! The from-space is scanned cell by cell in address order. Each black
//! object has its survival count bumped and is copied either to the
//! to-space or, once the count reaches the promotion threshold, to the old
//! generation. Everything else is dropped with the semispace.

use super::update::UpdateList;
use crate::allocator::{Allocator, Location, ObjectHeader};
use crate::bitmap::Color;
use crate::errors::ErrorKind;
use crate::logging::log_promotion;
use crate::objects::raw;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CopyOutcome {
    pub copied: usize,
    pub promoted: usize,
    pub survivor_bytes: usize,
    pub promoted_bytes: usize,
    pub reclaimed_objects: usize,
    pub reclaimed_bytes: usize,
}

pub(crate) fn copy_survivors(
    allocator: &mut Allocator,
    list: &mut UpdateList,
    threshold: u8,
) -> Result<CopyOutcome, ErrorKind> {
    let (nursery, old) = allocator.regions_mut();
    let (from, to) = nursery.spaces_mut();
    let cell_size = from.cell_size();
    let used = from.used_cells();

    let mut outcome = CopyOutcome::default();
    let mut cell = 0;

    while cell < used {
        if !from.is_active(cell) {
            cell += 1;
            continue;
        }

        let addr = from.address_of(cell);
        let mut header = unsafe { ObjectHeader::read(addr) };
        let span = header.cell_span(cell_size).max(1);

        if from.color(cell) != Color::Black {
            outcome.reclaimed_objects += 1;
            outcome.reclaimed_bytes += span * cell_size;
            cell += span;
            continue;
        }

        let size = header.total_size();
        let promote = header.record_survival() >= threshold;
        let (target, location) = if promote {
            let target = old.claim(span).ok_or(ErrorKind::OldGenerationExhausted {
                requested: size,
                capacity: old.capacity_bytes(),
            })?;
            (target, Location::Old)
        } else {
            let target = to.claim(span).ok_or(ErrorKind::NurseryExhausted {
                requested: size,
                available: to.free_bytes(),
            })?;
            (target, Location::Nursery)
        };
        list.push(addr, target)?;

        header.set_forward(target);
        let mut moved = header;
        moved.set_color(Color::White);
        moved.set_location(location);
        moved.clear_forward();

        unsafe {
            ObjectHeader::write(addr, header);
            raw::copy(addr, target, size);
            ObjectHeader::write(target, moved);
        }

        if promote {
            outcome.promoted += 1;
            outcome.promoted_bytes += span * cell_size;
            log_promotion(moved.uid(), size, target);
        } else {
            outcome.copied += 1;
            outcome.survivor_bytes += span * cell_size;
        }
        cell += span;
    }

    Ok(outcome)
}
