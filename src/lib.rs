//! cellheap - per-core generational copying heap for a register VM
//!
//! Each VM core owns one [`Heap`]: a nursery of two cell-granular
//! semispaces and an append-only old generation. Allocation bumps through
//! the nursery; when it fills, a stop-the-world minor collection marks from
//! the core's register frames, copies survivors (promoting those that have
//! survived often enough) and rewrites every reference.
//!
//! Objects are plain words in heap memory behind `Copy` handles:
//! structs, classes, arrays, closures, coroutines and raw payloads.

pub mod allocator;
pub mod bitmap;
pub mod config;
pub mod errors;
pub mod ffi;
pub mod gc;
pub mod heap;
pub mod logging;
pub mod objects;
pub mod vm;

pub use allocator::{Location, ObjectHeader, ObjectType, HEADER_SIZE};
pub use config::HeapConfig;
pub use errors::{ErrorKind, HeapError, Result};
pub use gc::{CallStack, CollectorState, FuncState, GcStats, RootIdx, RootProvider, Slot, REGISTER_COUNT};
pub use heap::Heap;
pub use objects::{
    find_global_index, ArrayRef, ClassRef, ClosureRef, CoroutineRef, CoroutineState, FieldAccess, StructRef,
};
pub use vm::{Core, FatalHandler, LogFatalHandler};
