//! Array objects - fixed-length runs of equal-sized elements
//!
//! ```text
//! header        32 bytes
//! length        u64
//! element_size  u64
//! is_pointer    u64   every element is an 8-byte reference
//! data address  u64   (inside this object)
//! data          length * element_size bytes, padded to 8
//! ```

use super::raw::{self, checked_align8};
use crate::allocator::{ObjectType, HEADER_SIZE};
use crate::errors::{ErrorKind, Result};
use crate::heap::Heap;

const LENGTH: usize = HEADER_SIZE;
const ELEMENT_SIZE: usize = HEADER_SIZE + 8;
const IS_POINTER: usize = HEADER_SIZE + 16;
const DATA_PTR: usize = HEADER_SIZE + 24;
const DATA: usize = HEADER_SIZE + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    pub is_pointer_container: bool,
    pub length: usize,
    pub element_size: usize,
}

impl ArrayLayout {
    /// Pointer arrays must use 8-byte elements
    pub fn new(is_pointer_container: bool, length: usize, element_size: usize) -> std::result::Result<Self, ErrorKind> {
        if element_size == 0 {
            return Err(ErrorKind::invalid_layout("array element size is zero"));
        }
        if is_pointer_container && element_size != 8 {
            return Err(ErrorKind::invalid_layout(format!(
                "pointer array elements are 8 bytes, not {}",
                element_size
            )));
        }
        Ok(Self { is_pointer_container, length, element_size })
    }

    pub fn data_bytes(&self) -> Option<usize> {
        self.length.checked_mul(self.element_size)
    }

    /// None when the size does not fit in a `usize`
    pub fn total_size(&self) -> Option<usize> {
        DATA.checked_add(checked_align8(self.data_bytes()?)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef(pub(crate) usize);

impl ArrayRef {
    pub fn from_address(heap: &Heap, addr: usize) -> Result<Self> {
        heap.check(addr, ObjectType::Array)?;
        Ok(Self(addr))
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0
    }

    /// # Safety
    /// `addr` must be freshly allocated, zeroed memory of `layout.total_size()` bytes.
    pub(crate) unsafe fn init(addr: usize, layout: &ArrayLayout) -> Self {
        raw::write_u64(addr + LENGTH, layout.length as u64);
        raw::write_u64(addr + ELEMENT_SIZE, layout.element_size as u64);
        raw::write_u64(addr + IS_POINTER, layout.is_pointer_container as u64);
        Self::rebase(addr);
        Self(addr)
    }

    /// # Safety
    /// `addr` must be an array object.
    pub(crate) unsafe fn rebase(addr: usize) {
        raw::write_u64(addr + DATA_PTR, (addr + DATA) as u64);
    }

    /// # Safety
    /// `addr` must be an array object.
    pub(crate) unsafe fn for_each_pointer_slot(addr: usize, mut visit: impl FnMut(usize)) {
        if raw::read_u64(addr + IS_POINTER) == 0 {
            return;
        }
        let data = raw::read_u64(addr + DATA_PTR) as usize;
        for index in 0..raw::read_u64(addr + LENGTH) as usize {
            visit(data + 8 * index);
        }
    }

    fn checked(self, heap: &Heap) -> Result<(usize, usize, bool, usize)> {
        heap.check(self.0, ObjectType::Array)?;
        unsafe {
            Ok((
                raw::read_u64(self.0 + LENGTH) as usize,
                raw::read_u64(self.0 + ELEMENT_SIZE) as usize,
                raw::read_u64(self.0 + IS_POINTER) != 0,
                raw::read_u64(self.0 + DATA_PTR) as usize,
            ))
        }
    }

    fn element(self, heap: &Heap, index: usize) -> Result<(usize, usize, bool)> {
        let (length, element_size, is_pointer, data) = self.checked(heap)?;
        if index >= length {
            return Err(heap.error(ErrorKind::IndexOutOfBounds { index, length }));
        }
        Ok((data + index * element_size, element_size, is_pointer))
    }

    pub fn len(self, heap: &Heap) -> Result<usize> {
        Ok(self.checked(heap)?.0)
    }

    pub fn is_empty(self, heap: &Heap) -> Result<bool> {
        Ok(self.len(heap)? == 0)
    }

    pub fn element_size(self, heap: &Heap) -> Result<usize> {
        Ok(self.checked(heap)?.1)
    }

    pub fn is_pointer_container(self, heap: &Heap) -> Result<bool> {
        Ok(self.checked(heap)?.2)
    }

    /// Raw bytes of one element
    pub fn read_bytes(self, heap: &Heap, index: usize) -> Result<Vec<u8>> {
        let (addr, size, _) = self.element(heap, index)?;
        Ok(unsafe { raw::read_bytes(addr, size) })
    }

    /// Element zero-extended to u64, native endian; elements wider than 8
    /// bytes are truncated to their first 8
    pub fn read_u64(self, heap: &Heap, index: usize) -> Result<u64> {
        let bytes = self.read_bytes(heap, index)?;
        let mut word = [0u8; 8];
        let len = bytes.len().min(8);
        if cfg!(target_endian = "little") {
            word[..len].copy_from_slice(&bytes[..len]);
        } else {
            word[8 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        }
        Ok(u64::from_ne_bytes(word))
    }

    pub fn write_bytes(self, heap: &mut Heap, index: usize, bytes: &[u8]) -> Result<()> {
        let (addr, size, is_pointer) = self.element(heap, index)?;
        if is_pointer {
            return Err(heap.error(ErrorKind::invalid_layout("scalar write into a pointer array")));
        }
        if bytes.len() != size {
            return Err(heap.error(ErrorKind::invalid_layout(format!(
                "element is {} bytes, got {}",
                size,
                bytes.len()
            ))));
        }
        unsafe { raw::write_bytes(addr, bytes) };
        Ok(())
    }

    /// Store the low `element_size` bytes of `value`
    pub fn write_u64(self, heap: &mut Heap, index: usize, value: u64) -> Result<()> {
        let size = self.element_size(heap)?;
        let bytes = value.to_ne_bytes();
        let mut element = vec![0u8; size];
        let len = size.min(8);
        if cfg!(target_endian = "little") {
            element[..len].copy_from_slice(&bytes[..len]);
        } else {
            element[size - len..].copy_from_slice(&bytes[8 - len..]);
        }
        self.write_bytes(heap, index, &element)
    }

    pub fn read_pointer(self, heap: &Heap, index: usize) -> Result<usize> {
        let (addr, _, is_pointer) = self.element(heap, index)?;
        if !is_pointer {
            return Err(heap.error(ErrorKind::invalid_layout("pointer read from a scalar array")));
        }
        Ok(unsafe { raw::read_u64(addr) as usize })
    }

    /// Store a reference; 0 is null
    pub fn write_pointer(self, heap: &mut Heap, index: usize, target: usize) -> Result<()> {
        let (addr, _, is_pointer) = self.element(heap, index)?;
        if !is_pointer {
            return Err(heap.error(ErrorKind::invalid_layout("pointer write into a scalar array")));
        }
        heap.check_reference(target)?;
        unsafe { raw::write_u64(addr, target as u64) };
        heap.write_barrier(self.0, target);
        Ok(())
    }

    /// Copy of the whole data block
    pub fn data(self, heap: &Heap) -> Result<Vec<u8>> {
        let (length, element_size, _, data) = self.checked(heap)?;
        Ok(unsafe { raw::read_bytes(data, length * element_size) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_validation() {
        assert!(ArrayLayout::new(true, 4, 8).is_ok());
        assert!(ArrayLayout::new(true, 4, 4).is_err());
        assert!(ArrayLayout::new(false, 4, 0).is_err());
    }

    #[test]
    fn test_layout_size() {
        let layout = ArrayLayout::new(false, 3, 3).unwrap();
        assert_eq!(layout.data_bytes(), Some(9));
        assert_eq!(layout.total_size(), Some(64 + 16));
    }

    #[test]
    fn test_layout_size_overflow() {
        let wide = ArrayLayout::new(false, usize::MAX, 2).unwrap();
        assert_eq!(wide.data_bytes(), None);
        assert_eq!(wide.total_size(), None);

        let padded = ArrayLayout::new(false, usize::MAX - 6, 1).unwrap();
        assert_eq!(padded.total_size(), None);

        let tail = ArrayLayout::new(true, usize::MAX / 8 - 1, 8).unwrap();
        assert_eq!(tail.total_size(), None);
    }

    #[test]
    fn test_pointer_slots() {
        let layout = ArrayLayout::new(true, 3, 8).unwrap();
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        let mut slots = Vec::new();
        unsafe {
            ArrayRef::init(addr, &layout);
            ArrayRef::for_each_pointer_slot(addr, |slot| slots.push(slot));
        }
        assert_eq!(slots, vec![addr + DATA, addr + DATA + 8, addr + DATA + 16]);
    }

    #[test]
    fn test_scalar_array_has_no_slots() {
        let layout = ArrayLayout::new(false, 8, 8).unwrap();
        let mut buffer = vec![0u64; layout.total_size().unwrap() / 8];
        let addr = buffer.as_mut_ptr() as usize;

        let mut count = 0;
        unsafe {
            ArrayRef::init(addr, &layout);
            ArrayRef::for_each_pointer_slot(addr, |_| count += 1);
        }
        assert_eq!(count, 0);
    }
}
