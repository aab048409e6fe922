use alloc::{format, string::String, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::{config::DcacheConfig, dentry::DentryFlags, inode::InodeKind};

use super::{find, negative, positive, setup, vfs};

const ROUND: usize = 2000;

#[test]
fn find_during_create_destroy() {
    let (mgr, root, _) = setup(DcacheConfig::new().with_hash_shift(2));
    let names: Vec<String> = (0..16).map(|i| format!("n{}", i)).collect();
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        for t in 0..2 {
            let (mgr, root, names) = (&mgr, &root, &names);
            s.spawn(move || {
                for i in 0..ROUND {
                    let name = &names[(i + t) % names.len()];
                    let d = match find(mgr, root, name) {
                        Some(d) => d,
                        None => {
                            let key = root.name_key(name.as_bytes());
                            let d = mgr.create(root, &key).unwrap();
                            mgr.add(&d, None).unwrap_or(d)
                        }
                    };
                    if i % 3 == 0 {
                        mgr.unhash(&d);
                    }
                    if i % 64 == 0 {
                        mgr.prune(4);
                    }
                }
            });
        }
        for _ in 0..2 {
            let (mgr, root, names, stop) = (&mgr, &root, &names, &stop);
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    for name in names.iter() {
                        if let Some(d) = find(mgr, root, name) {
                            assert_eq!(d.name().name(), name.as_bytes());
                            assert!(d.parent().ptr_eq(root));
                        }
                    }
                }
            });
        }
        s.spawn(|| {
            thread::sleep(std::time::Duration::from_millis(200));
            stop.store(true, Ordering::Relaxed);
        });
    });
    mgr.check();
    mgr.prune(usize::MAX);
    mgr.prune(usize::MAX);
    assert_eq!(mgr.stat().nr_dentry, 1);
    assert_eq!(root.count(), 1);
}

#[test]
fn stable_names_survive_renames() {
    // 只有4个桶, 被移动的目录项会穿过其他目录项所在的哈希链
    let (mgr, root, _) = setup(DcacheConfig::new().with_hash_shift(2));
    let stable: Vec<_> = (0..32)
        .map(|i| positive(&mgr, &root, &format!("s{}", i), InodeKind::File, 100 + i))
        .collect();
    let movers: Vec<_> = (0..4)
        .map(|i| negative(&mgr, &root, &format!("m{}a", i)))
        .collect();
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        for (i, m) in movers.iter().enumerate() {
            let (mgr, root, stop) = (&mgr, &root, &stop);
            s.spawn(move || {
                let names = [format!("m{}a", i), format!("m{}b", i)];
                let mut cur = 0;
                while !stop.load(Ordering::Relaxed) {
                    cur ^= 1;
                    let key = root.name_key(names[cur].as_bytes());
                    mgr.rename(m, root, &key, None).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let (mgr, root, stable, stop) = (&mgr, &root, &stable, &stop);
            s.spawn(move || {
                let mut round = 0;
                while round < ROUND {
                    round += 1;
                    for (i, d) in stable.iter().enumerate() {
                        let found = find(mgr, root, &format!("s{}", i))
                            .unwrap_or_else(|| panic!("lost s{} in round {}", i, round));
                        assert!(found.ptr_eq(d));
                    }
                }
                stop.store(true, Ordering::Relaxed);
            });
        }
        for m in movers.iter() {
            let (mgr, stop) = (&mgr, &stop);
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let (parent, name, bucket, flags) = m.snapshot();
                    if !flags.contains(DentryFlags::UNHASHED) {
                        assert_eq!(bucket, mgr.bucket_of(parent, &name));
                    }
                }
            });
        }
    });
    for (i, m) in movers.iter().enumerate() {
        let key = m.name();
        let name = key.name();
        assert!(name == format!("m{}a", i).as_bytes() || name == format!("m{}b", i).as_bytes());
        assert!(find(&mgr, &root, core::str::from_utf8(name).unwrap())
            .unwrap()
            .ptr_eq(m));
    }
    mgr.check();
}

#[test]
fn rename_between_directories() {
    let (mgr, root, _) = setup(DcacheConfig::new().with_hash_shift(1));
    let a = negative(&mgr, &root, "a");
    let b = negative(&mgr, &root, "b");
    let x = negative(&mgr, &a, "x");
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        {
            let (mgr, a, b, x, stop) = (&mgr, &a, &b, &x, &stop);
            s.spawn(move || {
                for i in 0..ROUND {
                    let (to, name) = if i % 2 == 0 { (b, "y") } else { (a, "x") };
                    mgr.rename(x, to, &to.name_key(name.as_bytes()), None)
                        .unwrap();
                }
                stop.store(true, Ordering::Relaxed);
            });
        }
        for _ in 0..2 {
            let (mgr, root, a, b, x, stop) = (&mgr, &root, &a, &b, &x, &stop);
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if let Some(d) = find(mgr, a, "x") {
                        assert!(d.ptr_eq(x));
                    }
                    if let Some(d) = find(mgr, b, "y") {
                        assert!(d.ptr_eq(x));
                    }
                    let p = x.parent();
                    assert!(p.ptr_eq(a) || p.ptr_eq(b));
                    assert!(mgr.is_subdir(x, root));
                    assert!(!mgr.is_subdir(a, x));
                }
            });
        }
    });
    assert!(x.parent().ptr_eq(&a));
    assert_eq!(b.count(), 1);
    assert_eq!(a.count(), 2);
    mgr.check();
}

#[test]
fn splice_races_open_by_handle() {
    let (vfs, _) = vfs();
    let ino = vfs.mkdir("/d").unwrap().inode().unwrap().ino();
    for _ in 0..ROUND / 10 {
        // 清除 /d 的目录项和 inode
        vfs.dcache().prune(usize::MAX);
        vfs.dcache().prune(usize::MAX);
        let (by_path, by_ino) = thread::scope(|s| {
            let a = s.spawn(|| vfs.lookup("/d").unwrap());
            let b = s.spawn(|| vfs.open_by_handle(vfs.root(), ino).unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });
        assert!(by_path.dentry.ptr_eq(&by_ino.dentry));
        assert!(!by_ino.dentry.is_disconnected());
        assert_eq!(vfs.dcache().nr_aliases(&by_path.inode().unwrap()), 1);
    }
}
