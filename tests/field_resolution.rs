use cellheap::{find_global_index, Core, FieldAccess, HeapConfig};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn sorted_ids(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::btree_set(0u32..10_000, 0..max_len).prop_map(|set| set.into_iter().collect())
}

#[test]
fn test_find_global_index_examples() {
    let table = [3, 8, 21, 22, 90];
    assert_eq!(find_global_index(&table, 3), Some(0));
    assert_eq!(find_global_index(&table, 22), Some(3));
    assert_eq!(find_global_index(&table, 90), Some(4));
    assert_eq!(find_global_index(&table, 4), None);
    assert_eq!(find_global_index(&table, 91), None);
    assert_eq!(find_global_index(&[], 1), None);
}

#[test]
fn test_fields_defined_out_of_order_resolve() {
    let mut core = Core::new(0, HeapConfig::compact()).unwrap();
    let record = core.allocate_struct(3, 24).unwrap();
    let heap = core.heap_mut();

    record.define_field(heap, 500, 16, false).unwrap();
    record.define_field(heap, 7, 0, true).unwrap();
    record.define_field(heap, 42, 8, false).unwrap();

    assert_eq!(record.field_ids(heap).unwrap(), vec![7, 42, 500]);
    assert_eq!(record.field_slot(heap, 42).unwrap(), 1);
    assert!(record.field_is_pointer(heap, 7).unwrap());
    assert!(!record.field_is_pointer(heap, 500).unwrap());

    record.write_field(heap, 500, 0x0102_0304).unwrap();
    assert_eq!(record.read_field(heap, 500).unwrap(), 0x0102_0304);
    assert_eq!(record.read_pointer_field(heap, 7).unwrap(), 0);
}

#[test]
fn test_class_fields_and_methods_are_independent() {
    let mut core = Core::new(0, HeapConfig::compact()).unwrap();
    let class = core.allocate_class(2, 2, 16, 9).unwrap();
    let heap = core.heap_mut();

    class.define_method(heap, 11, 0x1100).unwrap();
    class.define_method(heap, 4, 0x0400).unwrap();
    class.define_field(heap, 11, 0, false).unwrap();
    class.write_field(heap, 11, 77).unwrap();

    assert_eq!(class.class_id(heap).unwrap(), 9);
    assert_eq!(class.method_ids(heap).unwrap(), vec![4, 11]);
    assert_eq!(class.find_method(heap, 11).unwrap(), 0x1100);
    assert_eq!(class.read_field(heap, 11).unwrap(), 77);
    assert!(!class.has_method(heap, 5).unwrap());
    assert!(class.define_method(heap, 12, 0x1200).is_err());
}

proptest! {
    #[test]
    fn prop_find_global_index_matches_linear_search(table in sorted_ids(200), target in 0u32..10_050) {
        let expected = table.iter().position(|&id| id == target);
        prop_assert_eq!(find_global_index(&table, target), expected);
    }

    #[test]
    fn prop_struct_fields_round_trip(ids in proptest::collection::btree_set(1u32..5_000, 1..24), seed in any::<u64>()) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let mut core = Core::new(0, HeapConfig::compact()).unwrap();
        let record = core.allocate_struct(ids.len(), ids.len() * 8).unwrap();
        let heap = core.heap_mut();

        // Define in reverse so every insert shifts the table
        for (position, &id) in ids.iter().enumerate().rev() {
            record.define_field(heap, id, position * 8, false).unwrap();
        }
        for &id in &ids {
            record.write_field(heap, id, seed ^ u64::from(id)).unwrap();
        }

        let table = record.field_ids(heap).unwrap();
        prop_assert_eq!(&table, &ids);
        let distinct: BTreeSet<u32> = table.iter().copied().collect();
        prop_assert_eq!(distinct.len(), table.len());

        for (slot, &id) in ids.iter().enumerate() {
            prop_assert_eq!(record.field_slot(heap, id).unwrap(), slot);
            prop_assert_eq!(find_global_index(&table, id), Some(slot));
            prop_assert_eq!(record.read_field(heap, id).unwrap(), seed ^ u64::from(id));
        }
    }
}
