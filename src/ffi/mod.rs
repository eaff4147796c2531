//! C FFI - Stable ABI for generated code
//!
//! Design: Opaque core handles with:
//! 1. Core lifecycle (new, free)
//! 2. Allocation returning object addresses, 0 on failure
//! 3. Register access on the innermost frame, so C callers can root objects
//! 4. Error propagation via a thread-local last error code

use crate::config::HeapConfig;
use crate::errors::HeapError;
use crate::objects::{find_global_index, ClosureRef};
use crate::vm::Core;
use std::cell::RefCell;
use tracing::debug;

thread_local! {
    static LAST_ERROR: RefCell<Option<HeapError>> = RefCell::new(None);
}

fn record<T>(result: crate::errors::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(error));
            None
        }
    }
}

/// Most recent error on this thread
pub fn last_error() -> Option<HeapError> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Code of the most recent error on this thread, 0 if none
#[no_mangle]
pub extern "C" fn cellheap_last_error() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, HeapError::code))
}

#[no_mangle]
pub extern "C" fn cellheap_clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Create a core with configuration discovered from `cellheap.toml`
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn cellheap_core_new(core_id: u32) -> *mut Core {
    match record(Core::new(core_id, HeapConfig::discover())) {
        Some(core) => {
            debug!(core = core_id, "Core created through FFI");
            Box::into_raw(Box::new(core))
        }
        None => std::ptr::null_mut(),
    }
}

/// # Safety
/// `core` must come from `cellheap_core_new` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn cellheap_core_free(core: *mut Core) {
    if !core.is_null() {
        drop(Box::from_raw(core));
    }
}

/// Non-zero once a fatal error halted the core
///
/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_core_halted(core: *const Core) -> i32 {
    match core.as_ref() {
        Some(core) => core.is_halted() as i32,
        None => 1,
    }
}

unsafe fn with_core<T>(core: *mut Core, op: impl FnOnce(&mut Core) -> crate::errors::Result<T>) -> Option<T> {
    let core = core.as_mut()?;
    record(op(core))
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_struct(core: *mut Core, field_count: u32, data_size: u32) -> usize {
    with_core(core, |core| core.allocate_struct(field_count as usize, data_size as usize)).map_or(0, |s| s.0)
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_class(
    core: *mut Core,
    method_count: u32,
    attr_count: u32,
    data_size: u32,
    class_id: u32,
) -> usize {
    with_core(core, |core| {
        core.allocate_class(method_count as usize, attr_count as usize, data_size as usize, class_id)
    })
    .map_or(0, |c| c.0)
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_array(
    core: *mut Core,
    is_pointer_container: bool,
    length: u32,
    element_size: u32,
) -> usize {
    with_core(core, |core| {
        core.allocate_array(is_pointer_container, length as usize, element_size as usize)
    })
    .map_or(0, |a| a.address())
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_closure(
    core: *mut Core,
    function_address: u64,
    arg_offset: u8,
    env_size: u32,
) -> usize {
    with_core(core, |core| core.allocate_closure(function_address, arg_offset, env_size as usize))
        .map_or(0, |c| c.address())
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_coroutine(core: *mut Core, closure: usize) -> usize {
    with_core(core, |core| {
        let closure = ClosureRef::from_address(core.heap(), closure);
        let closure = core.escalate(closure)?;
        core.allocate_coroutine(closure)
    })
    .map_or(0, |c| c.address())
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_allocate_raw(core: *mut Core, size: u32) -> usize {
    with_core(core, |core| core.allocate_raw(size as usize)).unwrap_or(0)
}

/// Store an object reference in a register of the innermost frame
///
/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_frame_set_ptr(core: *mut Core, register: u8, addr: usize) {
    if let Some(core) = core.as_mut() {
        core.frame_mut().set_ptr(register, addr);
    }
}

/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_frame_set_int(core: *mut Core, register: u8, value: u64) {
    if let Some(core) = core.as_mut() {
        core.frame_mut().set_int(register, value);
    }
}

/// Register value of the innermost frame; reflects moves made by collections
///
/// # Safety
/// `core` must be a live handle from `cellheap_core_new`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_frame_get(core: *const Core, register: u8) -> u64 {
    core.as_ref().map_or(0, |core| core.frame().get(register))
}

/// Position of `target` in a sorted id table, -1 if absent
///
/// # Safety
/// `table` must point to `len` readable `u32`s, or be null with `len == 0`.
#[no_mangle]
pub unsafe extern "C" fn cellheap_find_global_index(table: *const u32, len: usize, target: u32) -> i64 {
    if table.is_null() || len == 0 {
        return -1;
    }
    let table = std::slice::from_raw_parts(table, len);
    find_global_index(table, target).map_or(-1, |index| index as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_core() -> *mut Core {
        Box::into_raw(Box::new(Core::new(0, HeapConfig::compact()).unwrap()))
    }

    #[test]
    fn test_allocate_and_root_through_ffi() {
        cellheap_clear_error();
        let core = compact_core();
        unsafe {
            let addr = cellheap_allocate_struct(core, 2, 16);
            assert_ne!(addr, 0);
            cellheap_frame_set_ptr(core, 3, addr);
            assert_eq!(cellheap_frame_get(core, 3), addr as u64);
            assert_eq!(cellheap_core_halted(core), 0);
            cellheap_core_free(core);
        }
        assert_eq!(cellheap_last_error(), 0);
    }

    #[test]
    fn test_failure_sets_last_error() {
        cellheap_clear_error();
        let core = compact_core();
        unsafe {
            assert_eq!(cellheap_allocate_array(core, true, 4, 2), 0);
            assert_eq!(cellheap_last_error(), 6);
            assert_eq!(cellheap_core_halted(core), 1);
            assert_eq!(cellheap_allocate_raw(core, 8), 0);
            assert_eq!(cellheap_last_error(), 11);
            cellheap_core_free(core);
        }
        assert!(last_error().is_some());
        cellheap_clear_error();
        assert!(last_error().is_none());
    }

    #[test]
    fn test_find_global_index_abi() {
        let table = [2u32, 5, 9, 40];
        unsafe {
            assert_eq!(cellheap_find_global_index(table.as_ptr(), table.len(), 9), 2);
            assert_eq!(cellheap_find_global_index(table.as_ptr(), table.len(), 10), -1);
            assert_eq!(cellheap_find_global_index(std::ptr::null(), 0, 9), -1);
        }
    }
}
