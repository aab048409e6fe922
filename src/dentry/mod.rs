//!
//! 高速目录项缓存
//!
//! dentry不会缓存整个目录树, 按需回收
//!
//! 每个dentry都持有父目录的强引用, 父目录通过子目录链表枚举子项但不持有引用.
//! 根目录的父指针指向自身.
//!
//! 锁顺序: 结构锁 -> 节点锁. 查找只获取节点锁, 同时获取多个节点锁必须持有结构锁.
//!

use core::{
    fmt,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering},
};

use alloc::sync::Arc;
use spin::Mutex as SpinMutex;

use crate::{
    fssp::SuperBlock,
    hash_name::{HashName, NameKey},
    inode::Inode,
    list::InListNode,
    rcu::{RcuCollect, RcuHead},
};

pub mod d_path;
mod index;
mod lru_queue;
pub mod manager;
pub mod rename;
mod shrink;

pub use self::manager::{DentryManager, DentryStat};

pub(crate) const LIVE_MAGIC: u32 = 0x0dca_c4e1;
pub(crate) const POISON_MAGIC: u32 = 0xdead_dca0;

/// 未加入哈希表
pub(crate) const BUCKET_NONE: usize = usize::MAX;
/// 匿名目录项, 视为在哈希表中但不属于任何哈希链
pub(crate) const BUCKET_ANON: usize = usize::MAX - 1;

bitflags! {
    pub struct DentryFlags: u32 {
        /// 不在哈希表中, 引用计数归零时销毁
        const UNHASHED = 1 << 0;
        /// 通过inode号得到的目录项, 尚未连接到目录树
        const DISCONNECTED = 1 << 1;
        /// 最近被访问过, LRU扫描时给予第二次机会
        const REFERENCED = 1 << 2;
    }
}

inlist_access!(pub(crate) DentryLruNode, DentryCache, lru_node);
inlist_access!(pub(crate) DentrySubNode, DentryCache, sub_node);
inlist_access!(pub(crate) DentryAliasNode, DentryCache, alias_node);

/// 目录项节点
///
/// 内存由RCU回收, 无锁查找期间可以安全读取任何已经被移除的节点
#[repr(C)]
pub struct DentryCache {
    rcu: RcuHead,
    magic: AtomicU32,
    count: AtomicUsize,
    flags: AtomicU32,
    /// 只能在结构锁和节点锁内整体替换
    name: AtomicPtr<HashName>,
    parent: AtomicPtr<DentryCache>,
    bucket: AtomicUsize,
    /// 移除后保持不变, 正在遍历的读者可以继续前进
    hash_next: AtomicPtr<DentryCache>,
    /// 节点锁, 同时保存绑定的inode
    inode: SpinMutex<Option<Arc<Inode>>>,
    sb: Arc<SuperBlock>,
    /// 挂载在此目录项上的文件系统数量
    mounted: AtomicUsize,
    lru_node: InListNode<Self, DentryLruNode>, // 由LRU队列控制
    sub_head: InListNode<Self, DentrySubNode>,
    sub_node: InListNode<Self, DentrySubNode>, // 此节点连接到父目录的sub_head
    alias_node: InListNode<Self, DentryAliasNode>,
}

#[cfg(test)]
static_assertions::const_assert_eq!(core::mem::offset_of!(DentryCache, rcu), 0);

unsafe impl RcuCollect for DentryCache {
    fn rcu_head(&self) -> &RcuHead {
        &self.rcu
    }
}

impl DentryCache {
    fn new(sb: Arc<SuperBlock>, name: NonNull<HashName>, flags: DentryFlags) -> Self {
        Self {
            rcu: RcuHead::new(),
            magic: AtomicU32::new(LIVE_MAGIC),
            count: AtomicUsize::new(1),
            flags: AtomicU32::new(flags.bits()),
            name: AtomicPtr::new(name.as_ptr()),
            parent: AtomicPtr::new(core::ptr::null_mut()),
            bucket: AtomicUsize::new(BUCKET_NONE),
            hash_next: AtomicPtr::new(core::ptr::null_mut()),
            inode: SpinMutex::new(None),
            sb,
            mounted: AtomicUsize::new(0),
            lru_node: InListNode::new(),
            sub_head: InListNode::new(),
            sub_node: InListNode::new(),
            alias_node: InListNode::new(),
        }
    }
    #[inline(always)]
    pub(crate) fn ptr(&self) -> *mut Self {
        self as *const _ as *mut _
    }
    /// 目录项身份
    #[inline(always)]
    pub fn id(&self) -> usize {
        self as *const _ as usize
    }
    #[inline(always)]
    pub(crate) fn check_live(&self) {
        assert_eq!(
            self.magic.load(Ordering::Relaxed),
            LIVE_MAGIC,
            "dcache: access to reclaimed dentry {:#x}",
            self.id()
        );
    }
    #[inline(always)]
    pub fn flags(&self) -> DentryFlags {
        DentryFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }
    #[inline(always)]
    pub(crate) fn set_flags(&self, f: DentryFlags) {
        self.flags.fetch_or(f.bits(), Ordering::AcqRel);
    }
    #[inline(always)]
    pub(crate) fn clear_flags(&self, f: DentryFlags) {
        self.flags.fetch_and(!f.bits(), Ordering::AcqRel);
    }
    /// 最近一次访问标记, 已经设置时不写内存
    #[inline(always)]
    pub(crate) fn mark_referenced(&self) {
        if !self.flags().contains(DentryFlags::REFERENCED) {
            self.set_flags(DentryFlags::REFERENCED);
        }
    }
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
    #[inline(always)]
    pub fn is_hashed(&self) -> bool {
        !self.flags().contains(DentryFlags::UNHASHED)
    }
    #[inline(always)]
    pub fn is_disconnected(&self) -> bool {
        self.flags().contains(DentryFlags::DISCONNECTED)
    }
    #[inline(always)]
    pub(crate) fn parent_ptr(&self) -> *mut Self {
        self.parent.load(Ordering::Acquire)
    }
    /// 父指针指向自身
    #[inline(always)]
    pub fn is_root(&self) -> bool {
        core::ptr::eq(self.parent_ptr(), self)
    }
    #[inline(always)]
    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.sb
    }
    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inode.lock().clone()
    }
    pub fn is_negative(&self) -> bool {
        self.inode.lock().is_none()
    }
    pub fn is_dir(&self) -> bool {
        self.inode.lock().as_ref().map_or(false, |i| i.is_dir())
    }
    pub fn is_mountpoint(&self) -> bool {
        self.mounted.load(Ordering::Acquire) != 0
    }
    pub(crate) fn mount_inc(&self) {
        self.mounted.fetch_add(1, Ordering::AcqRel);
    }
    pub(crate) fn mount_dec(&self) {
        let prev = self.mounted.fetch_sub(1, Ordering::AcqRel);
        assert!(prev != 0);
    }
    /// # Safety
    ///
    /// 调用者持有结构锁, 或处于RCU读临界区内且能容忍并发重命名
    #[inline(always)]
    pub(crate) unsafe fn name_ref(&self) -> &NameKey {
        (*self.name.load(Ordering::Acquire)).key()
    }
    /// 按照此目录项所在文件系统的规则计算名字哈希
    pub fn name_key(&self, name: &[u8]) -> NameKey {
        NameKey::with_hash(name, self.sb.fs().custom_hash(name))
    }
    /// 在节点锁内读取 (父目录, 名字, 哈希桶)
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (usize, NameKey, usize, DentryFlags) {
        let _lk = self.inode.lock();
        (
            self.parent_ptr() as usize,
            unsafe { self.name_ref().clone() },
            self.bucket.load(Ordering::Relaxed),
            self.flags(),
        )
    }
}

impl Drop for DentryCache {
    fn drop(&mut self) {
        debug_assert_eq!(*self.count.get_mut(), 0);
        debug_assert!(self.inode.get_mut().is_none());
        debug_assert!(self.lru_node.is_empty());
        debug_assert!(self.sub_head.is_empty());
        debug_assert!(self.sub_node.is_empty());
        debug_assert!(self.alias_node.is_empty());
        *self.magic.get_mut() = POISON_MAGIC;
        let name = core::mem::replace(self.name.get_mut(), core::ptr::null_mut());
        if let Some(name) = NonNull::new(name) {
            unsafe { HashName::free(name) };
        }
    }
}

impl fmt::Debug for DentryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DentryCache")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("count", &self.count())
            .field("flags", &self.flags())
            .finish()
    }
}

/// 持有一个引用计数的目录项
pub struct Dentry {
    mgr: Arc<DentryManager>,
    node: NonNull<DentryCache>,
}

unsafe impl Send for Dentry {}
unsafe impl Sync for Dentry {}

impl Dentry {
    /// # Safety
    ///
    /// 调用者已经为 node 增加了引用计数
    pub(crate) unsafe fn from_raw(mgr: Arc<DentryManager>, node: NonNull<DentryCache>) -> Self {
        Self { mgr, node }
    }
    pub fn manager(&self) -> &Arc<DentryManager> {
        &self.mgr
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
    /// 当前名字的拷贝
    pub fn name(&self) -> NameKey {
        let _rcu = self.mgr.rcu().read_lock();
        unsafe { self.name_ref().clone() }
    }
    /// 父目录, 根目录返回自身
    pub fn parent(&self) -> Dentry {
        self.mgr.dget_parent(self)
    }
}

impl Deref for Dentry {
    type Target = DentryCache;
    #[inline(always)]
    fn deref(&self) -> &DentryCache {
        unsafe { self.node.as_ref() }
    }
}

impl Clone for Dentry {
    fn clone(&self) -> Self {
        self.check_live();
        self.count.fetch_add(1, Ordering::Relaxed);
        Self {
            mgr: self.mgr.clone(),
            node: self.node,
        }
    }
}

impl Drop for Dentry {
    fn drop(&mut self) {
        self.mgr.dput(self.node);
    }
}

impl PartialEq for Dentry {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Dentry {}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        f.debug_struct("Dentry")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("name", &name)
            .field("count", &self.count())
            .field("flags", &self.flags())
            .finish()
    }
}
