//! Tests for partition sets, the singleton cache, and dependency ids.

use anyhow::Result;
use batchplan::{DependencyId, DependencyIdAllocator, PartitionSet, PartitionSetCache, PlanError};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_partition_set_is_ordered() {
    let set: PartitionSet = [3, 0, 2, 0].into_iter().collect();

    assert_eq!(set.len(), 3);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
    assert_eq!(set.to_string(), "{0, 2, 3}");
}

#[test]
fn test_partition_set_is_only() {
    let single = PartitionSet::singleton(4);
    assert!(single.is_only(4));
    assert!(!single.is_only(1));

    let mut many = PartitionSet::singleton(4);
    many.insert(1);
    assert!(!many.is_only(4));
    assert!(!PartitionSet::new().is_only(4));
}

#[test]
fn test_singleton_cache_shares_sets() -> Result<()> {
    let cache = PartitionSetCache::new(4);
    assert_eq!(cache.num_partitions(), 4);

    let a = cache.singleton(2)?;
    let b = cache.singleton(2)?;
    assert!(Arc::ptr_eq(&a, &b));
    assert!(a.is_only(2));
    Ok(())
}

#[test]
fn test_singleton_cache_out_of_range() {
    let cache = PartitionSetCache::new(4);
    let err = cache.singleton(4).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::PartitionOutOfRange {
            partition: 4,
            num_partitions: 4
        })
    ));
}

#[test]
fn test_allocator_starts_at_default() {
    let ids = DependencyIdAllocator::default();
    assert_eq!(ids.peek(), DependencyId::new(9000));
    assert_eq!(ids.next_id().raw(), 9000);
    assert_eq!(ids.next_id().raw(), 9001);
    assert_eq!(ids.peek().raw(), 9002);
}

#[test]
fn test_allocator_is_strictly_increasing() {
    let ids = DependencyIdAllocator::new(1);
    let issued: Vec<DependencyId> = (0..100).map(|_| ids.next_id()).collect();

    assert!(issued.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_allocator_never_repeats_across_threads() {
    let ids = DependencyIdAllocator::new(500);
    let issued: Vec<DependencyId> = (0..10_000).into_par_iter().map(|_| ids.next_id()).collect();

    let unique: HashSet<_> = issued.iter().copied().collect();
    assert_eq!(unique.len(), 10_000);
    assert_eq!(issued.iter().min().map(DependencyId::raw), Some(500));
    assert_eq!(issued.iter().max().map(DependencyId::raw), Some(10_499));
}

#[test]
#[should_panic(expected = "dependency id space exhausted")]
fn test_allocator_panics_when_exhausted() {
    let ids = DependencyIdAllocator::new(u32::MAX);
    let _ = ids.next_id();
}
