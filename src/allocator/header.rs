//! Object header - prefix of every heap allocation
//!
//! Design: 32 bytes, 8-byte aligned, C-compatible. Enum-like fields are kept
//! as raw bytes so a header read straight out of arena memory can never hold
//! an invalid discriminant.

use crate::bitmap::Color;

/// Kind of object laid out after the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Struct = 0,
    Class = 1,
    Array = 2,
    Closure = 3,
    Coroutine = 4,
    /// Opaque payload with no traced fields
    CustomObject = 5,
}

impl ObjectType {
    #[inline]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ObjectType::Struct),
            1 => Some(ObjectType::Class),
            2 => Some(ObjectType::Array),
            3 => Some(ObjectType::Closure),
            4 => Some(ObjectType::Coroutine),
            5 => Some(ObjectType::CustomObject),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ObjectType::Struct => "struct",
            ObjectType::Class => "class",
            ObjectType::Array => "array",
            ObjectType::Closure => "closure",
            ObjectType::Coroutine => "coroutine",
            ObjectType::CustomObject => "custom",
        }
    }
}

/// Generation an object currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Location {
    Nursery = 0,
    Old = 1,
}

/// Object header (32 bytes)
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    object_type: u8,
    color: u8,
    location: u8,
    survived_count: u8,
    reserved: u32,
    total_size: u64,
    uid: u64,
    forward: u64,
}

pub const HEADER_SIZE: usize = core::mem::size_of::<ObjectHeader>();

const _: () = assert!(HEADER_SIZE == 32);

impl ObjectHeader {
    /// Header for a fresh nursery object
    #[inline]
    pub const fn new(object_type: ObjectType, total_size: usize, uid: u64) -> Self {
        Self {
            object_type: object_type as u8,
            color: Color::White as u8,
            location: Location::Nursery as u8,
            survived_count: 0,
            reserved: 0,
            total_size: total_size as u64,
            uid,
            forward: 0,
        }
    }

    /// Borrow the header stored at `addr`.
    ///
    /// # Safety
    /// `addr` must be the 8-byte aligned start of an object inside a live arena,
    /// and no other reference to the same header may be alive.
    #[inline]
    pub unsafe fn at<'a>(addr: usize) -> &'a mut ObjectHeader {
        &mut *(addr as *mut ObjectHeader)
    }

    /// # Safety
    /// Same contract as [`ObjectHeader::at`].
    #[inline]
    pub unsafe fn read(addr: usize) -> ObjectHeader {
        core::ptr::read(addr as *const ObjectHeader)
    }

    /// # Safety
    /// `addr` must point at `HEADER_SIZE` writable, 8-byte aligned bytes.
    #[inline]
    pub unsafe fn write(addr: usize, header: ObjectHeader) {
        core::ptr::write(addr as *mut ObjectHeader, header);
    }

    #[inline]
    pub fn object_type(&self) -> Option<ObjectType> {
        ObjectType::from_raw(self.object_type)
    }

    #[inline]
    pub fn color(&self) -> Color {
        Color::from_raw(self.color)
    }

    #[inline]
    pub fn set_color(&mut self, color: Color) {
        self.color = color.to_raw();
    }

    #[inline]
    pub fn location(&self) -> Location {
        if self.location == Location::Old as u8 {
            Location::Old
        } else {
            Location::Nursery
        }
    }

    #[inline]
    pub fn set_location(&mut self, location: Location) {
        self.location = location as u8;
    }

    #[inline]
    pub fn survived_count(&self) -> u8 {
        self.survived_count
    }

    /// Bump the survival counter, returning the new count
    #[inline]
    pub fn record_survival(&mut self) -> u8 {
        self.survived_count = self.survived_count.saturating_add(1);
        self.survived_count
    }

    /// Size in bytes including this header
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size as usize
    }

    #[inline]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// New address once the object has been relocated this cycle
    #[inline]
    pub fn forward(&self) -> Option<usize> {
        (self.forward != 0).then_some(self.forward as usize)
    }

    #[inline]
    pub fn set_forward(&mut self, addr: usize) {
        self.forward = addr as u64;
    }

    #[inline]
    pub fn clear_forward(&mut self) {
        self.forward = 0;
    }

    /// Cells occupied at the given cell size
    #[inline]
    pub fn cell_span(&self, cell_size: usize) -> usize {
        self.total_size().div_ceil(cell_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE, 32);
        assert_eq!(core::mem::align_of::<ObjectHeader>(), 8);
    }

    #[test]
    fn test_fresh_header_state() {
        let header = ObjectHeader::new(ObjectType::Array, 72, 9);
        assert_eq!(header.object_type(), Some(ObjectType::Array));
        assert_eq!(header.color(), Color::White);
        assert_eq!(header.location(), Location::Nursery);
        assert_eq!(header.survived_count(), 0);
        assert_eq!(header.forward(), None);
        assert_eq!(header.uid(), 9);
        assert_eq!(header.cell_span(16), 5);
    }

    #[test]
    fn test_survival_saturates() {
        let mut header = ObjectHeader::new(ObjectType::Struct, 32, 1);
        for _ in 0..300 {
            header.record_survival();
        }
        assert_eq!(header.survived_count(), u8::MAX);
    }

    #[test]
    fn test_unknown_type_byte() {
        assert_eq!(ObjectType::from_raw(6), None);
        assert_eq!(ObjectType::from_raw(ObjectType::Coroutine as u8), Some(ObjectType::Coroutine));
    }
}
