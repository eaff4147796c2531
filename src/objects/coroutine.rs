//! Coroutine objects and their saved frames
//!
//! ```text
//! header      32 bytes
//! closure     u64   reference, traced
//! frame slot  u64   index into the heap's coroutine frame table
//! resume_ip   u64
//! state       u64
//! ```
//!
//! The saved register frame is too large to live inline, so it sits in a
//! per-heap slot table. A slot is released when its coroutine object dies.

use super::closure::ClosureRef;
use super::raw;
use crate::allocator::{ObjectType, HEADER_SIZE};
use crate::errors::{ErrorKind, Result};
use crate::gc::FuncState;
use crate::heap::Heap;
use serde::Serialize;
use std::fmt;

const CLOSURE: usize = HEADER_SIZE;
const FRAME_SLOT: usize = HEADER_SIZE + 8;
const RESUME_IP: usize = HEADER_SIZE + 16;
const STATE: usize = HEADER_SIZE + 24;

pub const COROUTINE_SIZE: usize = HEADER_SIZE + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CoroutineState {
    Created = 0,
    Running = 1,
    Suspended = 2,
    Finished = 3,
}

impl CoroutineState {
    fn from_raw(raw: u64) -> Self {
        match raw {
            1 => CoroutineState::Running,
            2 => CoroutineState::Suspended,
            3 => CoroutineState::Finished,
            _ => CoroutineState::Created,
        }
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoroutineState::Created => "created",
            CoroutineState::Running => "running",
            CoroutineState::Suspended => "suspended",
            CoroutineState::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineRef(pub(crate) usize);

impl CoroutineRef {
    pub fn from_address(heap: &Heap, addr: usize) -> Result<Self> {
        heap.check(addr, ObjectType::Coroutine)?;
        Ok(Self(addr))
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }

    /// # Safety
    /// `addr` must be freshly allocated, zeroed memory of `COROUTINE_SIZE` bytes.
    pub(crate) unsafe fn init(addr: usize, closure: usize, slot: usize, resume_ip: u64) -> Self {
        raw::write_u64(addr + CLOSURE, closure as u64);
        raw::write_u64(addr + FRAME_SLOT, slot as u64);
        raw::write_u64(addr + RESUME_IP, resume_ip);
        raw::write_u64(addr + STATE, CoroutineState::Created as u64);
        Self(addr)
    }

    /// # Safety
    /// `addr` must be a coroutine object.
    pub(crate) unsafe fn for_each_pointer_slot(addr: usize, mut visit: impl FnMut(usize)) {
        visit(addr + CLOSURE);
    }

    /// # Safety
    /// `addr` must be a coroutine object.
    pub(crate) unsafe fn slot_at(addr: usize) -> usize {
        raw::read_u64(addr + FRAME_SLOT) as usize
    }

    pub fn closure(self, heap: &Heap) -> Result<ClosureRef> {
        heap.check(self.0, ObjectType::Coroutine)?;
        Ok(ClosureRef(unsafe { raw::read_u64(self.0 + CLOSURE) as usize }))
    }

    pub fn state(self, heap: &Heap) -> Result<CoroutineState> {
        heap.check(self.0, ObjectType::Coroutine)?;
        Ok(CoroutineState::from_raw(unsafe { raw::read_u64(self.0 + STATE) }))
    }

    pub fn resume_ip(self, heap: &Heap) -> Result<u64> {
        heap.check(self.0, ObjectType::Coroutine)?;
        Ok(unsafe { raw::read_u64(self.0 + RESUME_IP) })
    }

    pub fn frame_slot(self, heap: &Heap) -> Result<usize> {
        heap.check(self.0, ObjectType::Coroutine)?;
        Ok(unsafe { Self::slot_at(self.0) })
    }

    /// Saved frame; stale while the coroutine is running
    pub fn frame(self, heap: &Heap) -> Result<&FuncState> {
        let slot = self.frame_slot(heap)?;
        heap.coroutines
            .frame(slot, self.0)
            .ok_or_else(|| heap.error(ErrorKind::CoroutineNotFound { slot }))
    }

    fn expect_state(self, heap: &Heap, allowed: &[CoroutineState], expected: &'static str) -> Result<()> {
        let found = self.state(heap)?;
        if allowed.contains(&found) {
            Ok(())
        } else {
            Err(heap.error(ErrorKind::CoroutineState { expected, found }))
        }
    }

    fn set_state(self, state: CoroutineState) {
        unsafe { raw::write_u64(self.0 + STATE, state as u64) };
    }

    /// Hand the saved frame to the interpreter: Created/Suspended -> Running
    ///
    /// Returns the frame to install and the instruction to continue at.
    pub fn resume(self, heap: &mut Heap) -> Result<(FuncState, u64)> {
        self.expect_state(heap, &[CoroutineState::Created, CoroutineState::Suspended], "created or suspended")?;
        let slot = self.frame_slot(heap)?;
        let resume_ip = self.resume_ip(heap)?;

        let missing = heap.error(ErrorKind::CoroutineNotFound { slot });
        let saved = heap.coroutines.frame_mut(slot, self.0).ok_or(missing)?;
        let frame = std::mem::take(saved);

        self.set_state(CoroutineState::Running);
        Ok((frame, resume_ip))
    }

    /// Deep-copy the running frame back into the slot: Running -> Suspended
    pub fn suspend(self, heap: &mut Heap, frame: &FuncState, resume_ip: u64) -> Result<()> {
        self.expect_state(heap, &[CoroutineState::Running], "running")?;
        let slot = self.frame_slot(heap)?;

        let missing = heap.error(ErrorKind::CoroutineNotFound { slot });
        let saved = heap.coroutines.frame_mut(slot, self.0).ok_or(missing)?;
        saved.clone_from(frame);

        unsafe { raw::write_u64(self.0 + RESUME_IP, resume_ip) };
        self.set_state(CoroutineState::Suspended);
        Ok(())
    }

    /// Running -> Finished; the saved frame is cleared
    pub fn finish(self, heap: &mut Heap) -> Result<()> {
        self.expect_state(heap, &[CoroutineState::Running], "running")?;
        let slot = self.frame_slot(heap)?;

        let missing = heap.error(ErrorKind::CoroutineNotFound { slot });
        let saved = heap.coroutines.frame_mut(slot, self.0).ok_or(missing)?;
        *saved = FuncState::new();

        self.set_state(CoroutineState::Finished);
        Ok(())
    }
}

/// Saved frame and the coroutine object that owns it
#[derive(Debug)]
pub(crate) struct CoroutineFrame {
    pub owner: usize,
    pub frame: FuncState,
}

/// Slot table for coroutine frames, reusing released slots
#[derive(Debug, Default)]
pub(crate) struct CoroutineTable {
    slots: Vec<Option<CoroutineFrame>>,
    free: Vec<usize>,
}

impl CoroutineTable {
    pub(crate) fn insert(&mut self, owner: usize, frame: FuncState) -> usize {
        let entry = Some(CoroutineFrame { owner, frame });
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = entry;
                slot
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&CoroutineFrame> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn frame(&self, slot: usize, owner: usize) -> Option<&FuncState> {
        self.get(slot).filter(|entry| entry.owner == owner).map(|entry| &entry.frame)
    }

    pub(crate) fn frame_mut(&mut self, slot: usize, owner: usize) -> Option<&mut FuncState> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .filter(|entry| entry.owner == owner)
            .map(|entry| &mut entry.frame)
    }

    pub(crate) fn release(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                self.free.push(slot);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CoroutineFrame> {
        self.slots.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut CoroutineFrame> {
        self.slots.iter_mut().flatten()
    }

    /// Follow moved owners and release slots whose owner died
    ///
    /// `relocate` maps an owner to its address after collection, or None
    /// when the owner was not retained. Returns the number released.
    pub(crate) fn relocate_owners(&mut self, mut relocate: impl FnMut(usize) -> Option<usize>) -> usize {
        let mut released = 0;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(frame) = entry else { continue };
            match relocate(frame.owner) {
                Some(owner) => frame.owner = owner,
                None => {
                    *entry = None;
                    self.free.push(slot);
                    released += 1;
                }
            }
        }
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
