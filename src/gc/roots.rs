//! GC root tracking - where marking starts and what updating patches
//!
//! Roots include:
//! - Interpreter frames (256 registers plus an operand stack, with a pointer bitmap)
//! - Saved frames of coroutines living in the old generation
//! - Old objects recorded by the write barrier
//! - Temporary roots protected by the runtime across an allocation

use bitvec::prelude::*;
use std::collections::BTreeSet;
use std::fmt;

/// Registers per frame
pub const REGISTER_COUNT: usize = 256;

const POINTER_WORDS: usize = REGISTER_COUNT / 64;

/// Tagged register or operand value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Int(u64),
    /// Heap reference; 0 is null
    Ptr(usize),
}

impl Slot {
    #[inline]
    pub fn raw(self) -> u64 {
        match self {
            Slot::Int(value) => value,
            Slot::Ptr(addr) => addr as u64,
        }
    }

    #[inline]
    pub fn is_pointer(self) -> bool {
        matches!(self, Slot::Ptr(_))
    }
}

/// One interpreter activation
///
/// A register's pointer bit is only ever changed together with its value,
/// so the collector can trust the bitmap without inspecting values.
pub struct FuncState {
    registers: Box<[u64; REGISTER_COUNT]>,
    pointers: BitArray<[u64; POINTER_WORDS], Lsb0>,
    operands: Vec<Slot>,
}

impl FuncState {
    pub fn new() -> Self {
        Self {
            registers: Box::new([0; REGISTER_COUNT]),
            pointers: BitArray::new([0; POINTER_WORDS]),
            operands: Vec::new(),
        }
    }

    #[inline]
    pub fn get(&self, register: u8) -> u64 {
        self.registers[register as usize]
    }

    #[inline]
    pub fn is_pointer(&self, register: u8) -> bool {
        self.pointers[register as usize]
    }

    #[inline]
    pub fn slot(&self, register: u8) -> Slot {
        let value = self.get(register);
        if self.is_pointer(register) {
            Slot::Ptr(value as usize)
        } else {
            Slot::Int(value)
        }
    }

    #[inline]
    pub fn set_int(&mut self, register: u8, value: u64) {
        self.registers[register as usize] = value;
        self.pointers.set(register as usize, false);
    }

    #[inline]
    pub fn set_ptr(&mut self, register: u8, addr: usize) {
        self.registers[register as usize] = addr as u64;
        self.pointers.set(register as usize, true);
    }

    #[inline]
    pub fn set(&mut self, register: u8, slot: Slot) {
        match slot {
            Slot::Int(value) => self.set_int(register, value),
            Slot::Ptr(addr) => self.set_ptr(register, addr),
        }
    }

    pub fn clear(&mut self, register: u8) {
        self.set_int(register, 0);
    }

    /// `dst = src`, pointer bit included
    pub fn copy_register(&mut self, dst: u8, src: u8) {
        let slot = self.slot(src);
        self.set(dst, slot);
    }

    pub fn pointer_registers(&self) -> impl Iterator<Item = u8> + '_ {
        self.pointers.iter_ones().map(|index| index as u8)
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.count_ones()
    }

    pub fn push(&mut self, slot: Slot) {
        self.operands.push(slot);
    }

    pub fn pop(&mut self) -> Option<Slot> {
        self.operands.pop()
    }

    pub fn operands(&self) -> &[Slot] {
        &self.operands
    }

    /// Every reference held by this frame, nulls skipped
    pub(crate) fn for_each_root(&self, mut visit: impl FnMut(u64)) {
        for register in self.pointers.iter_ones() {
            let value = self.registers[register];
            if value != 0 {
                visit(value);
            }
        }
        for slot in &self.operands {
            if let Slot::Ptr(addr) = *slot {
                if addr != 0 {
                    visit(addr as u64);
                }
            }
        }
    }

    /// Rewrite every reference; the pointer bitmap is left untouched
    pub(crate) fn update_roots(&mut self, mut translate: impl FnMut(u64) -> u64) {
        for register in self.pointers.iter_ones() {
            let value = self.registers[register];
            if value != 0 {
                self.registers[register] = translate(value);
            }
        }
        for slot in &mut self.operands {
            if let Slot::Ptr(addr) = slot {
                if *addr != 0 {
                    *addr = translate(*addr as u64) as usize;
                }
            }
        }
    }
}

impl Default for FuncState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FuncState {
    fn clone(&self) -> Self {
        Self {
            registers: self.registers.clone(),
            pointers: self.pointers,
            operands: self.operands.clone(),
        }
    }

    /// Reuses this frame's buffers
    fn clone_from(&mut self, source: &Self) {
        *self.registers = *source.registers;
        self.pointers = source.pointers;
        self.operands.clone_from(&source.operands);
    }
}

impl fmt::Debug for FuncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncState")
            .field("pointer_registers", &self.pointer_count())
            .field("operands", &self.operands.len())
            .finish()
    }
}

/// Source of interpreter frames for a collection
pub trait RootProvider {
    /// Visit every active frame, innermost first
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut FuncState));
}

impl RootProvider for FuncState {
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut FuncState)) {
        visit(self);
    }
}

impl RootProvider for [FuncState] {
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut FuncState)) {
        for frame in self.iter_mut().rev() {
            visit(frame);
        }
    }
}

/// Frames of one core, base frame at the bottom
///
/// The base frame is never popped, so there is always a current frame.
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<FuncState>,
}

impl CallStack {
    pub fn new() -> Self {
        Self {
            frames: vec![FuncState::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &FuncState {
        &self.frames[self.frames.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut FuncState {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    pub fn push_frame(&mut self, frame: FuncState) {
        self.frames.push(frame);
    }

    /// Push a blank frame and return it
    pub fn enter(&mut self) -> &mut FuncState {
        self.frames.push(FuncState::new());
        self.current_mut()
    }

    /// None when only the base frame is left
    pub fn pop_frame(&mut self) -> Option<FuncState> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Innermost first, following each frame's caller
    pub fn frames(&self) -> impl Iterator<Item = &FuncState> {
        self.frames.iter().rev()
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl RootProvider for CallStack {
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut FuncState)) {
        self.frames.as_mut_slice().for_each_frame(visit);
    }
}

/// Old-generation objects that may reference the nursery
#[derive(Debug, Default)]
pub struct RememberedSet {
    objects: BTreeSet<usize>,
}

impl RememberedSet {
    pub fn insert(&mut self, addr: usize) -> bool {
        self.objects.insert(addr)
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.objects.contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.objects.iter().copied()
    }

    pub(crate) fn replace(&mut self, objects: BTreeSet<usize>) {
        self.objects = objects;
    }
}

/// Position of a temporary root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootIdx(usize);

/// Stack of addresses kept alive across allocations that may collect
///
/// Runtime code protects an object, allocates, then reads the possibly
/// moved address back through the index.
#[derive(Debug, Default)]
pub struct TempRoots {
    roots: Vec<usize>,
}

impl TempRoots {
    pub fn protect(&mut self, addr: usize) -> RootIdx {
        self.roots.push(addr);
        RootIdx(self.roots.len() - 1)
    }

    pub fn get(&self, idx: RootIdx) -> Option<usize> {
        self.roots.get(idx.0).copied()
    }

    /// Drop `idx` and every root protected after it
    pub fn release(&mut self, idx: RootIdx) {
        self.roots.truncate(idx.0);
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.roots.iter().copied()
    }

    pub(crate) fn update(&mut self, mut translate: impl FnMut(u64) -> u64) {
        for root in &mut self.roots {
            if *root != 0 {
                *root = translate(*root as u64) as usize;
            }
        }
    }
}
