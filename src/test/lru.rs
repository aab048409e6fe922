use alloc::{format, vec::Vec};

use crate::{config::DcacheConfig, dentry::DentryFlags};

use super::{find, negative, setup};

#[test]
fn prune_exact_count() {
    let (mgr, root, stat) = setup(DcacheConfig::new());
    let v: Vec<_> = (0..10).map(|i| negative(&mgr, &root, &format!("n{}", i))).collect();
    drop(v);
    assert_eq!(mgr.stat().nr_unused, 10);
    assert_eq!(mgr.prune(4), 4);
    assert_eq!(mgr.stat().nr_dentry, 7);
    // 最旧的先被回收
    for i in 0..4 {
        assert!(find(&mgr, &root, &format!("n{}", i)).is_none());
    }
    assert_eq!(mgr.prune(usize::MAX), 6);
    assert_eq!(mgr.prune(usize::MAX), 0);
    assert_eq!(mgr.stat().nr_dentry, 1);
    assert_eq!(stat.release(), 10);
    mgr.check();
}

#[test]
fn referenced_gets_second_chance() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    drop(negative(&mgr, &root, "a"));
    drop(negative(&mgr, &root, "b"));
    drop(find(&mgr, &root, "a").unwrap());
    assert_eq!(mgr.stat().nr_unused, 2);
    assert_eq!(mgr.prune(1), 1);
    let a = find(&mgr, &root, "a").unwrap();
    assert!(find(&mgr, &root, "b").is_none());
    drop(a);
    // a 又被标记, 第一次扫描只清除标记
    assert_eq!(mgr.prune(usize::MAX), 0);
    assert_eq!(mgr.stat().nr_unused, 1);
    assert_eq!(mgr.prune(usize::MAX), 1);
    assert_eq!(mgr.stat().nr_dentry, 1);
}

#[test]
fn busy_entries_leave_lru_lazily() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    drop(negative(&mgr, &root, "a"));
    let a = find(&mgr, &root, "a").unwrap();
    assert_eq!(mgr.stat().nr_unused, 1);
    assert_eq!(mgr.prune(usize::MAX), 0);
    assert_eq!(mgr.stat().nr_unused, 0);
    assert!(a.is_hashed());
    drop(a);
    assert_eq!(mgr.stat().nr_unused, 1);
    assert!(find(&mgr, &root, "a").is_some());
}

#[test]
fn pressure_scales_scan() {
    let config = DcacheConfig::new().with_cache_pressure(50);
    let (mgr, root, _) = setup(config);
    for i in 0..6 {
        drop(negative(&mgr, &root, &format!("n{}", i)));
    }
    assert_eq!(mgr.shrink_for_pressure(4), 2);
    assert_eq!(mgr.stat().nr_unused, 4);
    assert_eq!(mgr.shrink_for_pressure(0), 0);
}

#[test]
fn default_pressure_frees_requested() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    for i in 0..5 {
        drop(negative(&mgr, &root, &format!("n{}", i)));
    }
    assert_eq!(mgr.shrink_for_pressure(3), 3);
    assert_eq!(mgr.shrink_for_pressure(100), 2);
    assert_eq!(mgr.stat().nr_dentry, 1);
}

#[test]
fn zero_pressure_never_reclaims() {
    let config = DcacheConfig::new().with_cache_pressure(0);
    let (mgr, root, _) = setup(config);
    drop(negative(&mgr, &root, "a"));
    assert_eq!(mgr.shrink_for_pressure(100), 0);
    assert_eq!(mgr.stat().nr_unused, 1);
}

#[test]
fn pressure_leaves_parent_on_lru() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = negative(&mgr, &root, "a");
    drop(negative(&mgr, &a, "c"));
    mgr.unhash(&a);
    drop(a);
    assert_eq!(mgr.stat().nr_unused, 1);
    assert_eq!(mgr.shrink_for_pressure(1), 1);
    // a 的最后一个引用随 c 释放, 留给下一次扫描
    assert_eq!(mgr.stat().nr_dentry, 2);
    assert_eq!(mgr.stat().nr_unused, 1);
    assert_eq!(mgr.prune(usize::MAX), 1);
    assert_eq!(mgr.stat().nr_dentry, 1);
    assert_eq!(root.count(), 1);
    mgr.check();
}

#[test]
fn shrink_subtree_keeps_root() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = negative(&mgr, &root, "a");
    let b = negative(&mgr, &a, "b");
    drop(negative(&mgr, &b, "c"));
    drop(negative(&mgr, &a, "d"));
    drop(b);
    drop(negative(&mgr, &root, "other"));
    assert_eq!(mgr.shrink_subtree(&a), 3);
    assert!(a.is_hashed());
    assert!(!mgr.has_children(&a));
    assert!(find(&mgr, &root, "other").is_some());
    assert_eq!(mgr.stat().nr_dentry, 3);
}

#[test]
fn referenced_flag_cleared_by_subtree_shrink() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = negative(&mgr, &root, "a");
    drop(negative(&mgr, &a, "b"));
    drop(find(&mgr, &a, "b").unwrap());
    let b_flags = {
        let b = find(&mgr, &a, "b").unwrap();
        b.flags()
    };
    assert!(b_flags.contains(DentryFlags::REFERENCED));
    assert_eq!(mgr.shrink_subtree(&a), 1);
    assert!(find(&mgr, &a, "b").is_none());
}
