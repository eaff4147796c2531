//! Object layouts - everything that follows a header
//!
//! Design: Layouts are plain words in arena memory, addressed through
//! `Copy` handles. Handles validate against the heap before every access,
//! and all stores of references go through the heap's write barrier.
//!
//! Objects that carry internal tables store those tables' absolute
//! addresses; [`rebase`] recomputes them after the object moves.

mod array;
mod class;
mod closure;
mod coroutine;
mod fields;
pub(crate) mod raw;
mod search;
mod structs;

pub use array::{ArrayLayout, ArrayRef};
pub use class::{ClassLayout, ClassRef};
pub use closure::{ClosureLayout, ClosureRef};
pub use coroutine::{CoroutineRef, CoroutineState, COROUTINE_SIZE};
pub use fields::FieldAccess;
pub use search::find_global_index;
pub use structs::{StructLayout, StructRef};

pub(crate) use coroutine::CoroutineTable;

use crate::allocator::ObjectType;

/// Recompute internal table addresses of a relocated object
///
/// # Safety
/// `addr` must be a live object of type `object_type`.
pub(crate) unsafe fn rebase(addr: usize, object_type: ObjectType) {
    match object_type {
        ObjectType::Struct => StructRef::rebase(addr),
        ObjectType::Class => ClassRef::rebase(addr),
        ObjectType::Array => ArrayRef::rebase(addr),
        ObjectType::Closure => ClosureRef::rebase(addr),
        ObjectType::Coroutine | ObjectType::CustomObject => {}
    }
}

/// Visit the address of every reference word inside an object
///
/// Coroutine frames are not included; they live outside the object.
///
/// # Safety
/// `addr` must be a live object of type `object_type`.
pub(crate) unsafe fn for_each_pointer_slot(addr: usize, object_type: ObjectType, visit: impl FnMut(usize)) {
    match object_type {
        ObjectType::Struct => StructRef::table_at(addr).for_each_pointer_slot(visit),
        ObjectType::Class => ClassRef::table_at(addr).for_each_pointer_slot(visit),
        ObjectType::Array => ArrayRef::for_each_pointer_slot(addr, visit),
        ObjectType::Closure => ClosureRef::for_each_pointer_slot(addr, visit),
        ObjectType::Coroutine => CoroutineRef::for_each_pointer_slot(addr, visit),
        ObjectType::CustomObject => {}
    }
}
