//! Per-core heap - allocation entry points and reference checks
//!
//! A heap belongs to exactly one core and is never shared. Every allocation
//! takes the core's frames as roots, since a full nursery triggers a minor
//! collection before the allocation is retried once.

use crate::allocator::{Allocator, AllocatorStats, Location, ObjectHeader, ObjectType, HEADER_SIZE};
use crate::config::HeapConfig;
use crate::errors::{ErrorKind, HeapError, Result};
use crate::gc::{CollectorState, GcStats, RememberedSet, RootIdx, RootProvider, TempRoots, UpdateList};
use crate::logging::log_allocation;
use crate::objects::{
    raw, ArrayLayout, ArrayRef, ClassLayout, ClassRef, ClosureLayout, ClosureRef, CoroutineRef, CoroutineTable,
    StructLayout, StructRef, COROUTINE_SIZE,
};
use tracing::info;

pub struct Heap {
    pub(crate) core: u32,
    pub(crate) config: HeapConfig,
    pub(crate) allocator: Allocator,
    pub(crate) update_list: UpdateList,
    pub(crate) remembered: RememberedSet,
    pub(crate) temp_roots: TempRoots,
    pub(crate) coroutines: CoroutineTable,
    pub(crate) state: CollectorState,
    pub(crate) stats: GcStats,
    next_uid: u64,
}

impl Heap {
    pub fn new(core: u32, config: HeapConfig) -> Result<Self> {
        config.validate().map_err(|err| HeapError::new(err.kind, core))?;
        let allocator = Allocator::new(&config).map_err(|kind| HeapError::new(kind, core))?;
        let update_list = UpdateList::with_capacity(config.effective_update_list_capacity());

        info!(
            core,
            cell_size = config.cell_size,
            semispace_bytes = config.nursery_bytes,
            old_generation_bytes = config.old_generation_bytes,
            "Heap initialized"
        );

        Ok(Self {
            core,
            config,
            allocator,
            update_list,
            remembered: RememberedSet::default(),
            temp_roots: TempRoots::default(),
            coroutines: CoroutineTable::default(),
            state: CollectorState::Idle,
            stats: GcStats::default(),
            next_uid: 1,
        })
    }

    #[inline]
    pub fn core_id(&self) -> u32 {
        self.core
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Counters plus current region occupancy
    pub fn stats(&self) -> GcStats {
        let regions = self.allocator.stats();
        GcStats {
            nursery_used_bytes: regions.nursery_used_bytes,
            nursery_capacity_bytes: regions.nursery_capacity_bytes,
            old_used_bytes: regions.old_used_bytes,
            old_capacity_bytes: regions.old_capacity_bytes,
            remembered_objects: self.remembered.len(),
            coroutine_frames: self.coroutines.len(),
            ..self.stats
        }
    }

    pub fn allocator_stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }

    #[inline]
    pub(crate) fn error(&self, kind: ErrorKind) -> HeapError {
        HeapError::new(kind, self.core)
    }

    // ===== Allocation =====

    /// Allocate `total_size` bytes (header included) in the nursery
    ///
    /// Collects once if the nursery is full. The returned memory is zeroed
    /// apart from the header, so traced types must be initialised by their
    /// layout before the next allocation.
    pub(crate) fn allocate<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        object_type: ObjectType,
        total_size: usize,
    ) -> Result<usize> {
        if total_size < HEADER_SIZE {
            return Err(self.error(ErrorKind::invalid_layout(format!(
                "{} bytes cannot hold an object header",
                total_size
            ))));
        }

        let uid = self.next_uid;
        let addr = match self.allocator.try_allocate(object_type, total_size, uid) {
            Some(addr) => addr,
            None => {
                self.collect_minor(roots)?;
                self.allocator.try_allocate(object_type, total_size, uid).ok_or_else(|| {
                    self.error(ErrorKind::NurseryExhausted {
                        requested: total_size,
                        available: self.allocator.nursery().from_space().free_bytes(),
                    })
                })?
            }
        };

        self.next_uid += 1;
        self.stats.objects_allocated += 1;
        self.stats.bytes_allocated += total_size as u64;
        log_allocation(self.core, object_type.name(), total_size, addr);
        Ok(addr)
    }

    pub fn allocate_struct<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        field_count: usize,
        data_size: usize,
    ) -> Result<StructRef> {
        let layout = StructLayout::new(field_count, data_size);
        let total_size = layout.total_size().ok_or_else(|| self.too_large())?;
        let addr = self.allocate(roots, ObjectType::Struct, total_size)?;
        Ok(unsafe { StructRef::init(addr, &layout) })
    }

    pub fn allocate_class<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        method_count: usize,
        attr_count: usize,
        data_size: usize,
        class_id: u32,
    ) -> Result<ClassRef> {
        let layout = ClassLayout::new(method_count, attr_count, data_size, class_id);
        let total_size = layout.total_size().ok_or_else(|| self.too_large())?;
        let addr = self.allocate(roots, ObjectType::Class, total_size)?;
        Ok(unsafe { ClassRef::init(addr, &layout) })
    }

    pub fn allocate_array<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        is_pointer_container: bool,
        length: usize,
        element_size: usize,
    ) -> Result<ArrayRef> {
        let layout = ArrayLayout::new(is_pointer_container, length, element_size).map_err(|kind| self.error(kind))?;
        let total_size = layout.total_size().ok_or_else(|| self.too_large())?;
        let addr = self.allocate(roots, ObjectType::Array, total_size)?;
        Ok(unsafe { ArrayRef::init(addr, &layout) })
    }

    pub fn allocate_closure<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        function_address: u64,
        arg_offset: u8,
        env_size: usize,
    ) -> Result<ClosureRef> {
        let layout = ClosureLayout::new(function_address, arg_offset, env_size).map_err(|kind| self.error(kind))?;
        let addr = self.allocate(roots, ObjectType::Closure, layout.total_size())?;
        Ok(unsafe { ClosureRef::init(addr, &layout) })
    }

    /// Coroutine over `closure`, in state Created with a frame built from
    /// its upvalues
    ///
    /// The closure stays protected across the allocation, so a handle taken
    /// before the call is still valid for the new coroutine.
    pub fn allocate_coroutine<R: RootProvider + ?Sized>(
        &mut self,
        roots: &mut R,
        closure: ClosureRef,
    ) -> Result<CoroutineRef> {
        self.check(closure.address(), ObjectType::Closure)?;

        let idx = self.temp_roots.protect(closure.address());
        let allocated = self.allocate(roots, ObjectType::Coroutine, COROUTINE_SIZE);
        let closure = ClosureRef(self.temp_roots.get(idx).unwrap_or(closure.address()));
        self.temp_roots.release(idx);
        let addr = allocated?;

        let frame = closure.build_frame(self)?;
        let entry = closure.function_address(self)?;
        let slot = self.coroutines.insert(addr, frame);
        Ok(unsafe { CoroutineRef::init(addr, closure.address(), slot, entry) })
    }

    /// Untyped payload of `size` bytes, never scanned for references
    pub fn allocate_raw<R: RootProvider + ?Sized>(&mut self, roots: &mut R, size: usize) -> Result<usize> {
        let total_size = raw::checked_align8(size)
            .and_then(|payload| payload.checked_add(HEADER_SIZE))
            .ok_or_else(|| self.too_large())?;
        self.allocate(roots, ObjectType::CustomObject, total_size)
    }

    /// A request whose byte size does not fit in a `usize` can never be
    /// satisfied, collection or not
    fn too_large(&self) -> HeapError {
        self.error(ErrorKind::NurseryExhausted {
            requested: usize::MAX,
            available: self.allocator.nursery().from_space().free_bytes(),
        })
    }

    /// Payload bytes of a raw object
    pub fn read_raw(&self, addr: usize, offset: usize, len: usize) -> Result<Vec<u8>> {
        let payload = self.raw_payload(addr, offset, len)?;
        Ok(unsafe { raw::read_bytes(payload, len) })
    }

    pub fn write_raw(&mut self, addr: usize, offset: usize, bytes: &[u8]) -> Result<()> {
        let payload = self.raw_payload(addr, offset, bytes.len())?;
        unsafe { raw::write_bytes(payload, bytes) };
        Ok(())
    }

    fn raw_payload(&self, addr: usize, offset: usize, len: usize) -> Result<usize> {
        let header = self.check(addr, ObjectType::CustomObject)?;
        let length = header.total_size() - HEADER_SIZE;
        match offset.checked_add(len) {
            Some(end) if end <= length => Ok(addr + HEADER_SIZE + offset),
            _ => Err(self.error(ErrorKind::IndexOutOfBounds { index: offset, length })),
        }
    }

    // ===== Object validation =====

    /// Header of the live object at `addr`, which must be of `expected` type
    pub(crate) fn check(&self, addr: usize, expected: ObjectType) -> Result<ObjectHeader> {
        match self.allocator.object_at(addr) {
            Some(header) if header.object_type() == Some(expected) => Ok(header),
            _ => Err(self.error(ErrorKind::InvalidHandle { address: addr })),
        }
    }

    /// Null, or a live object of this heap
    pub(crate) fn check_reference(&self, target: usize) -> Result<()> {
        if target == 0 || self.allocator.object_at(target).is_some() {
            Ok(())
        } else {
            Err(self.error(ErrorKind::InvalidHandle { address: target }))
        }
    }

    pub fn header(&self, addr: usize) -> Result<ObjectHeader> {
        self.allocator
            .object_at(addr)
            .ok_or_else(|| self.error(ErrorKind::InvalidHandle { address: addr }))
    }

    pub fn object_type(&self, addr: usize) -> Result<ObjectType> {
        let header = self.header(addr)?;
        header
            .object_type()
            .ok_or_else(|| self.error(ErrorKind::InvalidHandle { address: addr }))
    }

    /// Generation holding `addr`, None outside both allocated regions
    pub fn location(&self, addr: usize) -> Option<Location> {
        if self.allocator.in_nursery(addr) {
            Some(Location::Nursery)
        } else if self.allocator.in_old(addr) {
            Some(Location::Old)
        } else {
            None
        }
    }

    pub fn is_live_object(&self, addr: usize) -> bool {
        self.allocator.object_at(addr).is_some()
    }

    // ===== Barrier and roots =====

    /// Record an old-to-nursery store
    #[inline]
    pub(crate) fn write_barrier(&mut self, holder: usize, value: usize) {
        if self.allocator.in_old(holder) && self.allocator.in_nursery(value) {
            self.remembered.insert(holder);
        }
    }

    pub fn remembered(&self) -> &RememberedSet {
        &self.remembered
    }

    /// Keep `addr` alive and tracked across allocations
    pub fn protect(&mut self, addr: usize) -> RootIdx {
        self.temp_roots.protect(addr)
    }

    /// Current address of a protected object
    pub fn rooted(&self, idx: RootIdx) -> Option<usize> {
        self.temp_roots.get(idx)
    }

    /// Release `idx` and every root protected after it
    pub fn release(&mut self, idx: RootIdx) {
        self.temp_roots.release(idx);
    }

    pub fn temp_roots(&self) -> &TempRoots {
        &self.temp_roots
    }

    /// Saved coroutine frames still owned by a live coroutine
    pub fn coroutine_frames(&self) -> usize {
        self.coroutines.len()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("core", &self.core)
            .field("state", &self.state)
            .field("allocator", &self.allocator)
            .field("remembered", &self.remembered.len())
            .field("temp_roots", &self.temp_roots.len())
            .field("coroutine_frames", &self.coroutines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::FuncState;

    #[test]
    fn test_new_heap_is_idle_and_empty() {
        let heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let stats = heap.stats();
        assert_eq!(heap.state(), CollectorState::Idle);
        assert_eq!(stats.nursery_used_bytes, 0);
        assert_eq!(stats.old_used_bytes, 0);
        assert_eq!(stats.minor_collections, 0);
    }

    #[test]
    fn test_invalid_config_is_tagged_with_core() {
        let config = HeapConfig {
            cell_size: 12,
            ..HeapConfig::compact()
        };
        let err = Heap::new(5, config).unwrap_err();
        assert_eq!(err.core, Some(5));
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_allocation_is_cell_aligned_and_typed() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();

        let a = heap.allocate_raw(&mut frame, 5).unwrap();
        let b = heap.allocate_raw(&mut frame, 40).unwrap();
        let cell = heap.config().cell_size;

        assert_eq!(a % cell, 0);
        assert_eq!(b % cell, 0);
        assert!(b > a);
        assert_eq!(heap.object_type(a).unwrap(), ObjectType::CustomObject);
        assert_eq!(heap.location(a), Some(Location::Nursery));
        assert_eq!(heap.header(b).unwrap().total_size(), HEADER_SIZE + 40);
        assert_ne!(heap.header(a).unwrap().uid(), heap.header(b).unwrap().uid());
    }

    #[test]
    fn test_raw_payload_bounds() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();
        let addr = heap.allocate_raw(&mut frame, 16).unwrap();

        heap.write_raw(addr, 4, b"cell").unwrap();
        assert_eq!(heap.read_raw(addr, 4, 4).unwrap(), b"cell");

        let err = heap.read_raw(addr, 12, 8).unwrap_err();
        assert_eq!(err.code(), 12);
    }

    #[test]
    fn test_handles_are_checked() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();
        let addr = heap.allocate_raw(&mut frame, 8).unwrap();

        assert!(heap.check(addr, ObjectType::CustomObject).is_ok());
        assert_eq!(heap.check(addr, ObjectType::Struct).unwrap_err().code(), 7);
        assert_eq!(heap.check(addr + 8, ObjectType::CustomObject).unwrap_err().code(), 7);
        assert!(heap.check_reference(0).is_ok());
        assert!(heap.check_reference(0xdead_0000).is_err());
        assert!(!heap.is_live_object(0));
    }

    #[test]
    fn test_raw_payload_is_never_traced() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();
        let target = heap.allocate_raw(&mut frame, 16).unwrap();
        let holder = heap.allocate_raw(&mut frame, 8).unwrap();
        let word = (target as u64).to_ne_bytes();
        heap.write_raw(holder, 0, &word).unwrap();
        frame.set_ptr(0, holder);

        heap.collect_minor(&mut frame).unwrap();

        let stats = heap.stats();
        assert_eq!(stats.last_marked, 1);
        assert_eq!(stats.objects_reclaimed, 1);
        let moved = frame.get(0) as usize;
        assert_eq!(heap.read_raw(moved, 0, 8).unwrap(), word);
    }

    #[test]
    fn test_unrepresentable_raw_size_is_exhaustion() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();

        let err = heap.allocate_raw(&mut frame, usize::MAX - 3).unwrap_err();
        assert_eq!(err.code(), 1);
        let err = heap.allocate_raw(&mut frame, usize::MAX - 30).unwrap_err();
        assert_eq!(err.code(), 1);
        assert_eq!(heap.stats().minor_collections, 0);
    }

    #[test]
    fn test_undersized_allocation_rejected() {
        let mut heap = Heap::new(0, HeapConfig::compact()).unwrap();
        let mut frame = FuncState::new();
        let err = heap.allocate(&mut frame, ObjectType::CustomObject, 8).unwrap_err();
        assert_eq!(err.code(), 6);
    }
}
