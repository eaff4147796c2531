//! Closure objects - code address plus captured registers
//!
//! ```text
//! header        32 bytes
//! fn_addr       u64
//! arg_offset    u64   first argument register
//! env_size      u64   number of upvalues
//! mask address  u64   (inside this object)
//! env address   u64   (inside this object)
//! mask          [u64; ceil(env_size / 64)]
//! upvalues      [u64; env_size]
//! ```
//!
//! Upvalues are register copies, so each carries the pointer bit of the
//! register it came from.

use super::raw::{self, bitmask_words};
use crate::allocator::{ObjectType, HEADER_SIZE};
use crate::errors::{ErrorKind, Result};
use crate::gc::{FuncState, Slot, REGISTER_COUNT};
use crate::heap::Heap;

const FN_ADDR: usize = HEADER_SIZE;
const ARG_OFFSET: usize = HEADER_SIZE + 8;
const ENV_SIZE: usize = HEADER_SIZE + 16;
const POINTER_MASK: usize = HEADER_SIZE + 24;
const UPVALUES: usize = HEADER_SIZE + 32;
const TABLES: usize = HEADER_SIZE + 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureLayout {
    pub function_address: u64,
    pub arg_offset: u8,
    pub env_size: usize,
}

impl ClosureLayout {
    /// Upvalues are installed into registers, so at most one per register
    pub fn new(function_address: u64, arg_offset: u8, env_size: usize) -> std::result::Result<Self, ErrorKind> {
        if env_size > REGISTER_COUNT {
            return Err(ErrorKind::invalid_layout(format!(
                "{} upvalues exceed {} registers",
                env_size, REGISTER_COUNT
            )));
        }
        Ok(Self { function_address, arg_offset, env_size })
    }

    pub const fn total_size(&self) -> usize {
        TABLES + 8 * bitmask_words(self.env_size) + 8 * self.env_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureRef(pub(crate) usize);

impl ClosureRef {
    pub fn from_address(heap: &Heap, addr: usize) -> Result<Self> {
        heap.check(addr, ObjectType::Closure)?;
        Ok(Self(addr))
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }

    /// # Safety
    /// `addr` must be freshly allocated, zeroed memory of `layout.total_size()` bytes.
    pub(crate) unsafe fn init(addr: usize, layout: &ClosureLayout) -> Self {
        raw::write_u64(addr + FN_ADDR, layout.function_address);
        raw::write_u64(addr + ARG_OFFSET, layout.arg_offset as u64);
        raw::write_u64(addr + ENV_SIZE, layout.env_size as u64);
        Self::rebase(addr);
        Self(addr)
    }

    /// # Safety
    /// `addr` must be a closure object.
    pub(crate) unsafe fn rebase(addr: usize) {
        let env_size = raw::read_u64(addr + ENV_SIZE) as usize;
        let mask = addr + TABLES;
        raw::write_u64(addr + POINTER_MASK, mask as u64);
        raw::write_u64(addr + UPVALUES, (mask + 8 * bitmask_words(env_size)) as u64);
    }

    /// # Safety
    /// `addr` must be a closure object.
    pub(crate) unsafe fn for_each_pointer_slot(addr: usize, mut visit: impl FnMut(usize)) {
        let env_size = raw::read_u64(addr + ENV_SIZE) as usize;
        let mask = raw::read_u64(addr + POINTER_MASK) as usize;
        let upvalues = raw::read_u64(addr + UPVALUES) as usize;
        for index in 0..env_size {
            if raw::test_bit(mask, index) {
                visit(upvalues + 8 * index);
            }
        }
    }

    pub fn function_address(self, heap: &Heap) -> Result<u64> {
        heap.check(self.0, ObjectType::Closure)?;
        Ok(unsafe { raw::read_u64(self.0 + FN_ADDR) })
    }

    pub fn arg_offset(self, heap: &Heap) -> Result<u8> {
        heap.check(self.0, ObjectType::Closure)?;
        Ok(unsafe { raw::read_u64(self.0 + ARG_OFFSET) as u8 })
    }

    pub fn env_size(self, heap: &Heap) -> Result<usize> {
        heap.check(self.0, ObjectType::Closure)?;
        Ok(unsafe { raw::read_u64(self.0 + ENV_SIZE) as usize })
    }

    fn upvalue_addrs(self, heap: &Heap, index: usize) -> Result<(usize, usize)> {
        let length = self.env_size(heap)?;
        if index >= length {
            return Err(heap.error(ErrorKind::IndexOutOfBounds { index, length }));
        }
        unsafe {
            Ok((
                raw::read_u64(self.0 + POINTER_MASK) as usize,
                raw::read_u64(self.0 + UPVALUES) as usize + 8 * index,
            ))
        }
    }

    pub fn upvalue(self, heap: &Heap, index: usize) -> Result<Slot> {
        let (mask, slot) = self.upvalue_addrs(heap, index)?;
        unsafe {
            let value = raw::read_u64(slot);
            Ok(if raw::test_bit(mask, index) {
                Slot::Ptr(value as usize)
            } else {
                Slot::Int(value)
            })
        }
    }

    pub fn set_upvalue(self, heap: &mut Heap, index: usize, value: Slot) -> Result<()> {
        let (mask, slot) = self.upvalue_addrs(heap, index)?;
        match value {
            Slot::Int(word) => unsafe {
                raw::assign_bit(mask, index, false);
                raw::write_u64(slot, word);
            },
            Slot::Ptr(target) => {
                heap.check_reference(target)?;
                unsafe {
                    raw::write_u64(slot, target as u64);
                    raw::assign_bit(mask, index, true);
                }
                heap.write_barrier(self.0, target);
            }
        }
        Ok(())
    }

    /// Copy `registers` of `frame` into upvalues 0..n, pointer bits included
    pub fn capture(self, heap: &mut Heap, frame: &FuncState, registers: &[u8]) -> Result<()> {
        for (index, &register) in registers.iter().enumerate() {
            self.set_upvalue(heap, index, frame.slot(register))?;
        }
        Ok(())
    }

    /// Fresh frame with upvalue `i` in register `i`
    pub fn build_frame(self, heap: &Heap) -> Result<FuncState> {
        let mut frame = FuncState::new();
        for index in 0..self.env_size(heap)? {
            frame.set(index as u8, self.upvalue(heap, index)?);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_size() {
        let layout = ClosureLayout::new(0x1000, 2, 3).unwrap();
        assert_eq!(layout.total_size(), 72 + 8 + 24);
        assert!(ClosureLayout::new(0, 0, REGISTER_COUNT + 1).is_err());
    }

    #[test]
    fn test_pointer_slots_follow_mask() {
        let layout = ClosureLayout::new(0x1000, 0, 4).unwrap();
        let mut buffer = vec![0u64; layout.total_size() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        let mut slots = Vec::new();
        unsafe {
            ClosureRef::init(addr, &layout);
            let mask = raw::read_u64(addr + POINTER_MASK) as usize;
            raw::assign_bit(mask, 1, true);
            raw::assign_bit(mask, 3, true);
            ClosureRef::for_each_pointer_slot(addr, |slot| slots.push(slot));
        }
        let upvalues = addr + TABLES + 8;
        assert_eq!(slots, vec![upvalues + 8, upvalues + 24]);
    }
}
