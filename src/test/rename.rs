use crate::{config::DcacheConfig, error::SysError, inode::InodeKind};

use super::{find, negative, positive, setup};

#[test]
fn rename_across_directories() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = positive(&mgr, &root, "a", InodeKind::Dir, 10);
    let x = positive(&mgr, &root, "x", InodeKind::File, 11);
    let key = a.name_key(b"y");
    mgr.rename(&x, &a, &key, None).unwrap();
    assert!(find(&mgr, &root, "x").is_none());
    assert!(find(&mgr, &a, "y").unwrap().ptr_eq(&x));
    assert!(x.parent().ptr_eq(&a));
    assert_eq!(x.name().name(), b"y");
    // 旧父目录的引用在结束移动后释放
    assert_eq!(root.count(), 2);
    assert_eq!(a.count(), 2);
    mgr.check();
}

#[test]
fn rename_over_existing() {
    let (mgr, root, stat) = setup(DcacheConfig::new());
    let x = positive(&mgr, &root, "x", InodeKind::File, 11);
    let y = positive(&mgr, &root, "y", InodeKind::File, 12);
    let key = root.name_key(b"y");
    mgr.rename(&x, &root, &key, Some(&y)).unwrap();
    assert!(find(&mgr, &root, "y").unwrap().ptr_eq(&x));
    assert!(find(&mgr, &root, "x").is_none());
    assert!(!y.is_hashed());
    assert_eq!(y.name().name(), b"x");
    drop(y);
    assert_eq!(stat.evict(), 1);
    assert_eq!(mgr.stat().nr_dentry, 2);
}

#[test]
fn rename_onto_hashed_name_fails() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let x = negative(&mgr, &root, "x");
    let _y = negative(&mgr, &root, "y");
    let key = root.name_key(b"y");
    assert_eq!(mgr.rename(&x, &root, &key, None).unwrap_err(), SysError::EEXIST);
    assert!(find(&mgr, &root, "x").unwrap().ptr_eq(&x));
}

#[test]
fn rename_in_place_changes_name_only() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let x = negative(&mgr, &root, "x");
    let parent = x.parent();
    mgr.rename(&x, &root, &root.name_key(b"z"), None).unwrap();
    assert!(x.parent().ptr_eq(&parent));
    assert!(find(&mgr, &root, "z").unwrap().ptr_eq(&x));
    assert_eq!(root.count(), 3);
}

#[test]
#[should_panic(expected = "under itself")]
fn rename_into_descendant_panics() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = negative(&mgr, &root, "a");
    let b = negative(&mgr, &a, "b");
    let _ = mgr.rename(&a, &b, &b.name_key(b"a"), None);
}

#[test]
fn is_subdir_follows_parents() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let a = negative(&mgr, &root, "a");
    let b = negative(&mgr, &a, "b");
    let c = negative(&mgr, &b, "c");
    assert!(mgr.is_subdir(&c, &a));
    assert!(mgr.is_subdir(&c, &root));
    assert!(mgr.is_subdir(&a, &a));
    assert!(!mgr.is_subdir(&a, &c));
    let d = negative(&mgr, &root, "d");
    assert!(!mgr.is_subdir(&c, &d));
    mgr.rename(&b, &d, &d.name_key(b"b"), None).unwrap();
    assert!(mgr.is_subdir(&c, &d));
    assert!(!mgr.is_subdir(&c, &a));
}

#[test]
fn splice_connects_disconnected_dir() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let inode = crate::inode::Inode::new(40, InodeKind::Dir, root.sb().clone());
    let anon = mgr.create_anon(inode.clone()).unwrap();
    assert!(anon.is_disconnected());
    assert!(anon.is_root());
    let key = root.name_key(b"d");
    let fallback = mgr.create(&root, &key).unwrap();
    let alias = mgr.splice_alias(Some(inode), &fallback).unwrap();
    assert!(alias.ptr_eq(&anon));
    assert!(!anon.is_disconnected());
    assert!(!anon.is_root());
    assert!(anon.parent().ptr_eq(&root));
    assert!(fallback.is_root());
    assert!(!fallback.is_hashed());
    assert!(find(&mgr, &root, "d").unwrap().ptr_eq(&anon));
    drop(fallback);
    assert_eq!(root.count(), 2);
    mgr.check();
}

#[test]
fn splice_without_alias_adds_fallback() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let inode = crate::inode::Inode::new(41, InodeKind::Dir, root.sb().clone());
    let fallback = mgr.create(&root, &root.name_key(b"d")).unwrap();
    assert!(mgr.splice_alias(Some(inode), &fallback).is_none());
    assert!(fallback.is_hashed());
    assert!(!fallback.is_negative());
    let neg = mgr.create(&root, &root.name_key(b"n")).unwrap();
    assert!(mgr.splice_alias(None, &neg).is_none());
    assert!(neg.is_hashed());
    assert!(neg.is_negative());
}

#[test]
fn move_guard_batches_moves() {
    let (mgr, root, _) = setup(DcacheConfig::new());
    let x = negative(&mgr, &root, "x");
    let y = negative(&mgr, &root, "y");
    let mut mv = mgr.begin_move();
    mv.move_entry(&x, &root, &root.name_key(b"t"), None).unwrap();
    mv.move_entry(&y, &root, &root.name_key(b"x"), None).unwrap();
    mv.move_entry(&x, &root, &root.name_key(b"y"), None).unwrap();
    mv.end_move();
    assert!(find(&mgr, &root, "y").unwrap().ptr_eq(&x));
    assert!(find(&mgr, &root, "x").unwrap().ptr_eq(&y));
    assert!(find(&mgr, &root, "t").is_none());
}
