use alloc::{boxed::Box, sync::Arc};

use crate::{error::SysError, memfs::MemFs};

use super::vfs;

#[test]
fn nested_path() {
    let (vfs, _) = vfs();
    vfs.mkdir("/a").unwrap();
    vfs.mkdir("/a/b").unwrap();
    let c = vfs.create("/a/b/c").unwrap();
    assert_eq!(vfs.path_of(&c).unwrap(), "/a/b/c");
    assert_eq!(vfs.path_of(vfs.root()).unwrap(), "/");
    let b = vfs.lookup("a/./b/").unwrap();
    assert_eq!(vfs.path_of(&b).unwrap(), "/a/b");
    let up = vfs.lookup_at(&b, "../../..").unwrap();
    assert_eq!(vfs.path_of(&up).unwrap(), "/");
}

#[test]
fn deleted_suffix() {
    let (vfs, _) = vfs();
    vfs.mkdir("/a").unwrap();
    vfs.mkdir("/a/b").unwrap();
    let c = vfs.create("/a/b/c").unwrap();
    vfs.unlink("/a/b/c").unwrap();
    assert_eq!(vfs.path_of(&c).unwrap(), "/a/b/c (deleted)");
    assert_eq!(vfs.lookup("/a/b/c").unwrap_err(), SysError::ENOENT);
}

#[test]
fn deleted_ancestor_marks_path() {
    let (vfs, _) = vfs();
    vfs.mkdir("/a").unwrap();
    let b = vfs.mkdir("/a/b").unwrap();
    vfs.rmdir("/a/b").unwrap();
    assert_eq!(vfs.path_of(&b).unwrap(), "/a/b (deleted)");
}

#[test]
fn short_buffer_too_long() {
    let (vfs, _) = vfs();
    vfs.mkdir("/abcdef").unwrap();
    let p = vfs.create("/abcdef/ghijkl").unwrap();
    let root = vfs.root();
    let mut buf = [0u8; 8];
    let err = vfs
        .dcache()
        .resolve_path(&p.dentry, &p.mount, &root.dentry, &root.mount, &mut buf)
        .unwrap_err();
    assert_eq!(err, SysError::ENAMETOOLONG);
    let mut buf = [0u8; 14];
    let path = vfs
        .dcache()
        .resolve_path(&p.dentry, &p.mount, &root.dentry, &root.mount, &mut buf)
        .unwrap();
    assert_eq!(path, b"/abcdef/ghijkl");
}

#[test]
fn path_crosses_mounts() {
    let (vfs, _) = vfs();
    vfs.mkdir("/mnt").unwrap();
    vfs.mount("/mnt", Box::new(MemFs::new())).unwrap();
    vfs.mkdir("/mnt/x").unwrap();
    let x = vfs.lookup("/mnt/x").unwrap();
    assert!(!Arc::ptr_eq(x.dentry.sb(), vfs.root().dentry.sb()));
    assert_eq!(vfs.path_of(&x).unwrap(), "/mnt/x");
    let mnt = vfs.lookup("/mnt").unwrap();
    assert!(mnt.is_mount_root());
    assert_eq!(vfs.path_of(&mnt).unwrap(), "/mnt");
    let up = vfs.lookup_at(&x, "../..").unwrap();
    assert!(up.dentry.ptr_eq(&vfs.root().dentry));
}

#[test]
fn path_relative_to_subtree() {
    let (vfs, _) = vfs();
    vfs.mkdir("/a").unwrap();
    let a = vfs.lookup("/a").unwrap();
    let f = vfs.create("/a/f").unwrap();
    let s = vfs
        .dcache()
        .path_string(&f.dentry, &f.mount, &a.dentry, &a.mount)
        .unwrap();
    assert_eq!(s, "/f");
}
