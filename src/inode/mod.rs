use core::fmt;

use alloc::sync::Arc;
use spin::Mutex as SpinMutex;

use crate::{
    dentry::{DentryAliasNode, DentryCache},
    fssp::SuperBlock,
    list::InListNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Dir,
    File,
}

/// 目录项绑定的文件对象
///
/// 生命周期由 `Arc` 管理, 最后一个引用释放时调用文件系统的 `evict`
pub struct Inode {
    ino: u64,
    kind: InodeKind,
    sb: Arc<SuperBlock>,
    /// 绑定到此inode的全部目录项, 由目录项结构锁保护
    pub(crate) aliases: InListNode<DentryCache, DentryAliasNode>,
    /// 目录修改串行化
    dir_lock: SpinMutex<()>,
}

impl Inode {
    pub fn new(ino: u64, kind: InodeKind, sb: Arc<SuperBlock>) -> Arc<Self> {
        Arc::new(Self {
            ino,
            kind,
            sb,
            aliases: InListNode::new(),
            dir_lock: SpinMutex::new(()),
        })
    }
    #[inline(always)]
    pub fn ino(&self) -> u64 {
        self.ino
    }
    #[inline(always)]
    pub fn kind(&self) -> InodeKind {
        self.kind
    }
    #[inline(always)]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Dir
    }
    #[inline(always)]
    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.sb
    }
    pub(crate) fn dir_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.dir_lock.lock()
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field("sb", &self.sb.id())
            .finish()
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        debug_assert!(self.aliases.is_empty(), "inode dropped with aliases");
        self.sb.fs().evict(self);
    }
}
