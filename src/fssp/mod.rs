//! 文件系统超级块与后端接口

use core::fmt;

use alloc::{boxed::Box, sync::Arc};
use spin::Mutex as SpinMutex;

use crate::{
    dentry::DentryCache,
    error::{SysError, SysR},
    hash_name::{hash_name, NameHash},
    inode::{Inode, InodeKind},
};

/// 引用计数归零时目录项的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// 留在缓存中进入LRU
    Keep,
    /// 立即移出哈希表并销毁
    Unhash,
}

/// 文件系统后端
///
/// 带默认实现的方法是目录项缓存的钩子. `custom_hash`, `custom_compare`
/// 和 `delete_policy` 在锁内调用, 禁止重入目录项缓存. `release`,
/// `target_release` 和 `evict` 在解锁后调用.
pub trait Fs: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn root(&self, sb: &Arc<SuperBlock>) -> SysR<Arc<Inode>>;
    /// 目录中不存在 name 时返回 None
    fn lookup(&self, sb: &Arc<SuperBlock>, dir: &Inode, name: &[u8]) -> SysR<Option<Arc<Inode>>>;
    fn create(
        &self,
        sb: &Arc<SuperBlock>,
        dir: &Inode,
        name: &[u8],
        kind: InodeKind,
    ) -> SysR<Arc<Inode>>;
    fn link(&self, _dir: &Inode, _name: &[u8], _target: &Inode) -> SysR<()> {
        Err(SysError::EOPNOTSUPP)
    }
    fn unlink(&self, dir: &Inode, name: &[u8], target: &Inode) -> SysR<()>;
    fn rmdir(&self, dir: &Inode, name: &[u8], target: &Inode) -> SysR<()>;
    /// 目标存在时覆盖
    fn rename(&self, old_dir: &Inode, old_name: &[u8], new_dir: &Inode, new_name: &[u8])
        -> SysR<()>;
    /// 通过inode号打开, 不需要路径
    fn get_inode(&self, _sb: &Arc<SuperBlock>, _ino: u64) -> SysR<Arc<Inode>> {
        Err(SysError::EOPNOTSUPP)
    }

    fn custom_hash(&self, name: &[u8]) -> NameHash {
        hash_name(name)
    }
    /// stored: 缓存中的名字
    fn custom_compare(&self, stored: &[u8], name: &[u8]) -> bool {
        stored == name
    }
    /// 在节点锁内调用, inode 为目录项当前绑定的对象
    fn delete_policy(&self, _entry: &DentryCache, _inode: Option<&Inode>) -> DeletePolicy {
        DeletePolicy::Keep
    }
    /// 目录项销毁前调用
    fn release(&self, _entry: &DentryCache) {}
    /// 目录项解除与inode的绑定
    fn target_release(&self, _entry: &DentryCache, inode: Arc<Inode>) {
        drop(inode)
    }
    /// inode最后一个引用释放
    fn evict(&self, _inode: &Inode) {}
}

/// fs special
pub struct SuperBlock {
    fs: Box<dyn Fs>,
    /// 跨目录重命名串行化
    rename_lock: SpinMutex<()>,
}

impl SuperBlock {
    pub fn new(fs: Box<dyn Fs>) -> Arc<Self> {
        Arc::new(Self {
            fs,
            rename_lock: SpinMutex::new(()),
        })
    }
    #[inline(always)]
    pub fn fs(&self) -> &dyn Fs {
        &*self.fs
    }
    /// 超级块身份
    #[inline(always)]
    pub fn id(&self) -> usize {
        self as *const _ as usize
    }
    pub fn root_inode(self: &Arc<Self>) -> SysR<Arc<Inode>> {
        self.fs.root(self)
    }
    pub(crate) fn rename_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.rename_lock.lock()
    }
}

impl fmt::Debug for SuperBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SuperBlock({}@{:#x})", self.fs.name(), self.id())
    }
}
