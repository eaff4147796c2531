use cellheap::{
    ArrayRef, ClosureRef, Core, ErrorKind, FatalHandler, FieldAccess, HeapConfig, HeapError, Location, Slot, StructRef,
};
use std::sync::{Arc, Mutex};

const LINK: u32 = 10;
const COUNT: u32 = 11;

fn compact_core() -> Core {
    Core::new(0, HeapConfig::compact()).unwrap()
}

/// Allocate garbage until at least one more minor collection has run
fn force_collection(core: &mut Core) {
    let before = core.stats().minor_collections;
    while core.stats().minor_collections == before {
        core.allocate_raw(256).unwrap();
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(u32, i32)>>>);

impl FatalHandler for Recorder {
    fn on_fatal(&mut self, core: u32, error: &HeapError) {
        if let Ok(mut seen) = self.0.lock() {
            seen.push((core, error.code()));
        }
    }
}

#[test]
fn test_struct_and_array_survive_nursery_exhaustion() {
    let mut core = compact_core();

    let array = core.allocate_array(false, 16, 4).unwrap();
    for index in 0..16 {
        array.write_u64(core.heap_mut(), index, (index * 3 + 1) as u64).unwrap();
    }
    let before = array.data(core.heap()).unwrap();
    core.frame_mut().set_ptr(1, array.address());

    let record = core.allocate_struct(2, 16).unwrap();
    record.define_field(core.heap_mut(), LINK, 0, true).unwrap();
    record.define_field(core.heap_mut(), COUNT, 8, false).unwrap();
    let array_addr = core.frame().get(1) as usize;
    record.write_pointer_field(core.heap_mut(), LINK, array_addr).unwrap();
    record.write_field(core.heap_mut(), COUNT, 1234).unwrap();
    core.frame_mut().set_ptr(0, record.address());
    core.frame_mut().clear(1);

    force_collection(&mut core);

    let heap = core.heap();
    let record = StructRef::from_address(heap, core.frame().get(0) as usize).unwrap();
    assert_ne!(record.address(), 0);
    assert_eq!(record.read_field(heap, COUNT).unwrap(), 1234);

    let array = ArrayRef::from_address(heap, record.read_pointer_field(heap, LINK).unwrap()).unwrap();
    assert_ne!(array.address(), array_addr);
    assert_eq!(array.len(heap).unwrap(), 16);
    assert_eq!(array.data(heap).unwrap(), before);
}

#[test]
fn test_closure_rewrites_only_flagged_upvalue() {
    let mut core = compact_core();

    let target = core.allocate_raw(8).unwrap();
    core.frame_mut().set_int(0, 111);
    core.frame_mut().set_ptr(1, target);
    core.frame_mut().set_int(2, 333);

    let closure = core.allocate_closure(0x1000, 0, 3).unwrap();
    let snapshot = core.frame().clone();
    closure.capture(core.heap_mut(), &snapshot, &[0, 1, 2]).unwrap();
    let captured = closure.upvalue(core.heap(), 1).unwrap();
    core.frame_mut().set_ptr(3, closure.address());
    core.frame_mut().clear(1);

    force_collection(&mut core);

    let heap = core.heap();
    let closure = ClosureRef::from_address(heap, core.frame().get(3) as usize).unwrap();
    assert_eq!(closure.upvalue(heap, 0).unwrap(), Slot::Int(111));
    assert_eq!(closure.upvalue(heap, 2).unwrap(), Slot::Int(333));

    let Slot::Ptr(moved) = closure.upvalue(heap, 1).unwrap() else {
        panic!("upvalue 1 lost its pointer flag");
    };
    assert_ne!(Slot::Ptr(moved), captured);
    assert!(heap.is_live_object(moved));
    assert_eq!(closure.function_address(heap).unwrap(), 0x1000);
}

#[test]
fn test_promotion_after_threshold_collections() {
    let mut core = compact_core();
    let addr = core.allocate_raw(32).unwrap();
    core.frame_mut().set_ptr(0, addr);

    for _ in 0..2 {
        force_collection(&mut core);
        let addr = core.frame().get(0) as usize;
        assert_eq!(core.heap().location(addr), Some(Location::Nursery));
    }

    force_collection(&mut core);
    let addr = core.frame().get(0) as usize;
    assert_eq!(core.heap().location(addr), Some(Location::Old));
    assert_eq!(core.heap().header(addr).unwrap().survived_count(), 3);
}

#[test]
fn test_repeated_collections_do_not_grow() {
    let mut core = compact_core();
    let live = core.allocate_array(true, 8, 8).unwrap();
    core.frame_mut().set_ptr(0, live.address());

    let mut old_after_warmup = None;
    for round in 0..20 {
        force_collection(&mut core);
        let stats = core.stats();
        assert!(stats.last_survivor_bytes <= 256);
        if round == 5 {
            old_after_warmup = Some(stats.old_used_bytes);
        }
    }

    assert_eq!(Some(core.stats().old_used_bytes), old_after_warmup);
    assert!(core.stats().objects_reclaimed > 0);
}

#[test]
fn test_old_generation_exhaustion_halts_core() {
    let recorder = Recorder::default();
    let config = HeapConfig {
        nursery_bytes: 8 * 1024,
        old_generation_bytes: 256,
        ..HeapConfig::default()
    };
    let mut core = Core::new(7, config).unwrap().with_fatal_handler(recorder.clone());

    // Live array of live arrays, enough to overflow 256 bytes of old space
    let outer = core.allocate_array(true, 4, 8).unwrap();
    core.frame_mut().set_ptr(0, outer.address());
    for index in 0..4 {
        let inner = core.allocate_raw(64).unwrap();
        let outer = ArrayRef::from_address(core.heap(), core.frame().get(0) as usize).unwrap();
        outer.write_pointer(core.heap_mut(), index, inner).unwrap();
    }

    let err = loop {
        if let Err(err) = core.allocate_raw(512) {
            break err;
        }
    };

    assert_eq!(err.code(), 2);
    assert_eq!(err.core, Some(7));
    assert!(core.is_halted());
    assert_eq!(*recorder.0.lock().unwrap(), vec![(7, 2)]);
    assert_eq!(core.allocate_raw(8).unwrap_err().kind, ErrorKind::CoreHalted);
}

#[test]
fn test_oversized_allocation_is_fatal() {
    let mut core = compact_core();
    let err = core.allocate_raw(128 * 1024).unwrap_err();
    assert_eq!(err.code(), 1);
    assert!(core.is_halted());
}

#[test]
fn test_unrepresentable_typed_sizes_are_fatal() {
    let attempts: Vec<Box<dyn Fn(&mut Core) -> Result<(), HeapError>>> = vec![
        Box::new(|core| core.allocate_struct(0, usize::MAX - 40).map(drop)),
        Box::new(|core| core.allocate_struct(1, usize::MAX - 40).map(drop)),
        Box::new(|core| core.allocate_struct(usize::MAX / 4, 8).map(drop)),
        Box::new(|core| core.allocate_class(usize::MAX / 8, 1, 8, 3).map(drop)),
        Box::new(|core| core.allocate_class(1, 1, usize::MAX - 64, 3).map(drop)),
        Box::new(|core| core.allocate_array(false, usize::MAX - 6, 1).map(drop)),
        Box::new(|core| core.allocate_array(true, usize::MAX / 4, 8).map(drop)),
        Box::new(|core| core.allocate_raw(usize::MAX - 6).map(drop)),
    ];

    for attempt in attempts {
        let mut core = compact_core();
        let err = attempt(&mut core).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NurseryExhausted { .. }), "{:?}", err);
        assert!(core.is_halted());
        assert_eq!(core.stats().minor_collections, 0);
        assert_eq!(core.stats().nursery_used_bytes, 0);
    }
}

#[test]
fn test_large_struct_beyond_nursery_is_fatal() {
    let mut core = compact_core();
    let err = core.allocate_struct(4, 1 << 20).unwrap_err();
    assert_eq!(err.code(), 1);
    assert!(core.is_halted());

    let mut core = compact_core();
    let err = core.allocate_array(true, 1 << 16, 8).unwrap_err();
    assert_eq!(err.code(), 1);
}

#[test]
fn test_missing_attribute_escalates() {
    let mut core = compact_core();
    let record = core.allocate_struct(1, 8).unwrap();
    record.define_field(core.heap_mut(), 3, 0, false).unwrap();

    let lookup = record.read_field(core.heap(), 4);
    let err = core.escalate(lookup).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AttributeNotFound { global_id: 4 });
    assert_eq!(err.code(), 4);
    assert!(core.is_halted());
}

#[test]
fn test_missing_method_escalates() {
    let mut core = compact_core();
    let class = core.allocate_class(2, 0, 0, 17).unwrap();
    class.define_method(core.heap_mut(), 30, 0xbeef).unwrap();
    assert_eq!(class.find_method(core.heap(), 30).unwrap(), 0xbeef);

    let lookup = class.find_method(core.heap(), 31);
    let err = core.escalate(lookup).unwrap_err();
    assert_eq!(err.code(), 5);
}

#[test]
fn test_cores_have_disjoint_heaps() {
    let mut first = Core::new(1, HeapConfig::compact()).unwrap();
    let second = Core::new(2, HeapConfig::compact()).unwrap();

    let addr = first.allocate_raw(16).unwrap();
    assert!(first.heap().is_live_object(addr));
    assert!(!second.heap().is_live_object(addr));
    assert_eq!(second.heap().location(addr), None);
}
