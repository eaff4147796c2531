//! Global-id resolution
//!
//! Field and method tables keep their global ids sorted ascending, so the
//! position of an id in its table is also the object's local slot number.

/// Branchless binary search for `target` in an ascending table
///
/// The loop shape is fixed by the table length alone; the comparison feeds a
/// conditional move instead of a branch.
#[inline]
pub fn find_global_index(table: &[u32], target: u32) -> Option<usize> {
    let mut len = table.len();
    if len == 0 {
        return None;
    }

    let mut base = 0usize;
    while len > 1 {
        let half = len / 2;
        base = if table[base + half] <= target { base + half } else { base };
        len -= half;
    }

    (table[base] == target).then_some(base)
}

/// Where `target` would be inserted to keep `table` ascending
#[inline]
pub(crate) fn insertion_point(table: &[u32], target: u32) -> usize {
    table.partition_point(|&id| id < target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_every_entry() {
        let table = [2u32, 5, 9, 14, 40, 41, 1000];
        for (index, &id) in table.iter().enumerate() {
            assert_eq!(find_global_index(&table, id), Some(index));
        }
    }

    #[test]
    fn test_misses() {
        let table = [2u32, 5, 9];
        assert_eq!(find_global_index(&table, 0), None);
        assert_eq!(find_global_index(&table, 3), None);
        assert_eq!(find_global_index(&table, 10), None);
        assert_eq!(find_global_index(&[], 1), None);
    }

    #[test]
    fn test_single_entry() {
        assert_eq!(find_global_index(&[7], 7), Some(0));
        assert_eq!(find_global_index(&[7], 8), None);
    }

    #[test]
    fn test_insertion_point() {
        let table = [2u32, 5, 9];
        assert_eq!(insertion_point(&table, 1), 0);
        assert_eq!(insertion_point(&table, 6), 2);
        assert_eq!(insertion_point(&table, 99), 3);
    }
}
