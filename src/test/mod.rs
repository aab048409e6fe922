mod lru;
mod path;
mod rename;
mod stress;

use alloc::{boxed::Box, sync::Arc};

use crate::{
    config::DcacheConfig,
    dentry::{Dentry, DentryManager},
    fssp::SuperBlock,
    inode::{Inode, InodeKind},
    memfs::{MemFs, MemFsStat},
    VfsManager,
};

pub(crate) fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 单独的目录项缓存, 根目录位于一个内存文件系统上
pub(crate) fn setup(config: DcacheConfig) -> (Arc<DentryManager>, Dentry, Arc<MemFsStat>) {
    setup_fs(config, MemFs::new())
}

pub(crate) fn setup_fs(
    config: DcacheConfig,
    fs: MemFs,
) -> (Arc<DentryManager>, Dentry, Arc<MemFsStat>) {
    init_log();
    let stat = fs.stat();
    let sb = SuperBlock::new(Box::new(fs));
    let mgr = DentryManager::new(config);
    let root = mgr.create_root(&sb, sb.root_inode().unwrap()).unwrap();
    (mgr, root, stat)
}

/// 加入哈希表的负目录项
pub(crate) fn negative(mgr: &Arc<DentryManager>, parent: &Dentry, name: &str) -> Dentry {
    let key = parent.name_key(name.as_bytes());
    let d = mgr.create(parent, &key).unwrap();
    assert!(mgr.add(&d, None).is_none());
    d
}

/// 绑定一个文件系统不知道的inode
pub(crate) fn positive(
    mgr: &Arc<DentryManager>,
    parent: &Dentry,
    name: &str,
    kind: InodeKind,
    ino: u64,
) -> Dentry {
    let key = parent.name_key(name.as_bytes());
    let d = mgr.create(parent, &key).unwrap();
    let inode = Inode::new(ino, kind, parent.sb().clone());
    assert!(mgr.add(&d, Some(inode)).is_none());
    d
}

pub(crate) fn find(mgr: &Arc<DentryManager>, parent: &Dentry, name: &str) -> Option<Dentry> {
    mgr.lookup(parent, &parent.name_key(name.as_bytes()))
}

pub(crate) fn vfs_with(fs: MemFs) -> (VfsManager, Arc<MemFsStat>) {
    init_log();
    let stat = fs.stat();
    let vfs = VfsManager::new(DcacheConfig::new(), Box::new(fs)).unwrap();
    (vfs, stat)
}

pub(crate) fn vfs() -> (VfsManager, Arc<MemFsStat>) {
    vfs_with(MemFs::new())
}
