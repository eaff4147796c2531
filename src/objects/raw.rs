//! Raw arena access
//!
//! Every function here trusts its caller for bounds, alignment and liveness.
//! Callers validate handles against the heap before reaching this module.

use core::ptr;

#[inline(always)]
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// `align8` for sizes taken from callers; None past `usize::MAX`
#[inline(always)]
pub const fn checked_align8(n: usize) -> Option<usize> {
    match n.checked_add(7) {
        Some(padded) => Some(padded & !7),
        None => None,
    }
}

/// u64 words needed for a bitmask of `bits` bits
#[inline(always)]
pub const fn bitmask_words(bits: usize) -> usize {
    bits / 64 + (bits % 64 != 0) as usize
}

/// # Safety
/// `addr` must be 8-byte aligned and readable.
#[inline(always)]
pub unsafe fn read_u64(addr: usize) -> u64 {
    ptr::read(addr as *const u64)
}

/// # Safety
/// `addr` must be 8-byte aligned and writable.
#[inline(always)]
pub unsafe fn write_u64(addr: usize, value: u64) {
    ptr::write(addr as *mut u64, value);
}

/// # Safety
/// `addr` must be 4-byte aligned and readable.
#[inline(always)]
pub unsafe fn read_u32(addr: usize) -> u32 {
    ptr::read(addr as *const u32)
}

/// # Safety
/// `addr` must be 4-byte aligned and writable.
#[inline(always)]
pub unsafe fn write_u32(addr: usize, value: u32) {
    ptr::write(addr as *mut u32, value);
}

/// # Safety
/// `len` u32 values starting at the 4-byte aligned `addr` must stay valid and
/// unmodified for `'a`.
#[inline(always)]
pub unsafe fn u32_slice<'a>(addr: usize, len: usize) -> &'a [u32] {
    core::slice::from_raw_parts(addr as *const u32, len)
}

/// # Safety
/// `len` bytes at `addr` must be readable.
#[inline(always)]
pub unsafe fn read_bytes(addr: usize, len: usize) -> Vec<u8> {
    core::slice::from_raw_parts(addr as *const u8, len).to_vec()
}

/// # Safety
/// `bytes.len()` bytes at `addr` must be writable.
#[inline(always)]
pub unsafe fn write_bytes(addr: usize, bytes: &[u8]) {
    ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
}

/// # Safety
/// Source and destination must be valid for `len` bytes and not overlap.
#[inline(always)]
pub unsafe fn copy(src: usize, dst: usize, len: usize) {
    ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len);
}

/// # Safety
/// `len` bytes at `addr` must be writable.
#[inline(always)]
pub unsafe fn zero(addr: usize, len: usize) {
    ptr::write_bytes(addr as *mut u8, 0, len);
}

/// # Safety
/// The mask starting at `words` must cover bit `index`.
#[inline(always)]
pub unsafe fn test_bit(words: usize, index: usize) -> bool {
    (read_u64(words + (index / 64) * 8) >> (index % 64)) & 1 == 1
}

/// # Safety
/// The mask starting at `words` must cover bit `index`.
#[inline(always)]
pub unsafe fn assign_bit(words: usize, index: usize, value: bool) {
    let word_addr = words + (index / 64) * 8;
    let mask = 1u64 << (index % 64);
    let word = read_u64(word_addr);
    write_u64(word_addr, if value { word | mask } else { word & !mask });
}
