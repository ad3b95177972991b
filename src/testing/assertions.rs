//! Assertion functions for query results.

use crate::types::Value;
use std::fmt::Debug;

/// Assert that two row lists are equal in order and content.
///
/// # Panics
///
/// Panics if the lists differ in length or in any row.
///
/// # Example
///
/// ```
/// use blockflow::testing::{assert_rows_equal, int_rows};
///
/// assert_rows_equal(&int_rows(&[&[5], &[4]]), &int_rows(&[&[5], &[4]]));
/// ```
pub fn assert_rows_equal(actual: &[Vec<Value>], expected: &[Vec<Value>]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Row count mismatch:\n  Expected rows: {}\n  Actual rows: {}\n  Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            a, e,
            "Row mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}\n  Full expected: {expected:?}\n  Full actual: {actual:?}"
        );
    }
}

/// Assert that two row lists hold the same rows with the same multiplicities,
/// ignoring order.
///
/// Use it for results that went through a union or a parallel aggregation,
/// which do not keep row order across chains.
///
/// # Panics
///
/// Panics if the multisets differ.
///
/// # Example
///
/// ```
/// use blockflow::testing::{assert_rows_unordered_equal, int_rows};
///
/// assert_rows_unordered_equal(&int_rows(&[&[2, 5], &[1, 30]]), &int_rows(&[&[1, 30], &[2, 5]]));
/// ```
pub fn assert_rows_unordered_equal(actual: &[Vec<Value>], expected: &[Vec<Value>]) {
    let mut actual_sorted = actual.to_vec();
    let mut expected_sorted = expected.to_vec();
    actual_sorted.sort();
    expected_sorted.sort();

    if actual_sorted != expected_sorted {
        let missing: Vec<_> = expected_sorted.iter().filter(|r| !actual_sorted.contains(r)).collect();
        let extra: Vec<_> = actual_sorted.iter().filter(|r| !expected_sorted.contains(r)).collect();
        panic!(
            "Row content mismatch:\n  Missing rows: {missing:?}\n  Extra rows: {extra:?}\n  Expected: {expected:?}\n  Actual: {actual:?}"
        );
    }
}

/// Assert that a column, read top to bottom, is sorted by `cmp`.
///
/// # Panics
///
/// Panics at the first adjacent pair out of order.
pub fn assert_sorted_by<T: Debug>(values: &[T], cmp: impl Fn(&T, &T) -> std::cmp::Ordering) {
    for (i, pair) in values.windows(2).enumerate() {
        assert!(
            cmp(&pair[0], &pair[1]) != std::cmp::Ordering::Greater,
            "Values out of order at index {i}: {:?} before {:?}\n  Values: {values:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Assert that every row satisfies a predicate.
///
/// # Panics
///
/// Panics if any row does not satisfy the predicate.
pub fn assert_all_rows(rows: &[Vec<Value>], predicate: impl Fn(&[Value]) -> bool) {
    for (i, row) in rows.iter().enumerate() {
        assert!(predicate(row), "Predicate failed for row at index {i}:\n  Row: {row:?}\n  Rows: {rows:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::int_rows;

    #[test]
    fn unordered_equality_respects_multiplicity() {
        assert_rows_unordered_equal(&int_rows(&[&[1], &[1], &[2]]), &int_rows(&[&[2], &[1], &[1]]));
    }

    #[test]
    #[should_panic(expected = "Row content mismatch")]
    fn unordered_equality_catches_missing_duplicate() {
        assert_rows_unordered_equal(&int_rows(&[&[1], &[2]]), &int_rows(&[&[1], &[1], &[2]]));
    }

    #[test]
    #[should_panic(expected = "Row mismatch at index 1")]
    fn ordered_equality_reports_position() {
        assert_rows_equal(&int_rows(&[&[5], &[3]]), &int_rows(&[&[5], &[4]]));
    }

    #[test]
    fn sorted_check_accepts_ties() {
        assert_sorted_by(&[1, 2, 2, 3], Ord::cmp);
    }
}
