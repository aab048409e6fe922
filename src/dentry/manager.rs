use core::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use alloc::{boxed::Box, sync::Arc};
use spin::{Mutex as SpinMutex, MutexGuard};

use crate::{
    config::DcacheConfig,
    error::{SysError, SysR},
    fssp::{DeletePolicy, SuperBlock},
    hash_name::{HashName, NameKey},
    inode::Inode,
    rcu::RcuManager,
    sync::SeqCount,
};

use super::{
    index::DentryIndex, lru_queue::LRUQueue, rename::MoveTarget, Dentry, DentryCache,
    DentryFlags, BUCKET_ANON, BUCKET_NONE,
};

/// 结构锁保护的状态
///
/// 哈希链的修改, LRU队列, 子目录链表与别名链表都在这把锁内进行
pub(crate) struct TreeState {
    pub lru: LRUQueue,
}

pub(crate) type TreeGuard<'a> = MutexGuard<'a, TreeState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DentryStat {
    pub nr_dentry: usize,
    /// LRU队列长度
    pub nr_unused: usize,
}

/// 已经从所有结构中摘下, 等待解锁后完成销毁的目录项
pub(super) struct Detached {
    node: NonNull<DentryCache>,
    inode: Option<Arc<Inode>>,
    parent: Option<NonNull<DentryCache>>,
}

/// 目录项缓存上下文
///
/// 所有目录项共享一个哈希表和一个LRU队列, 没有全局单例.
/// 最后一个 `Dentry` 释放后析构, 析构时回收全部剩余目录项.
pub struct DentryManager {
    config: DcacheConfig,
    pub(super) index: DentryIndex,
    pub(super) tree: SpinMutex<TreeState>,
    pub(super) rename_seq: SeqCount,
    rcu: RcuManager,
    nr_dentry: AtomicUsize,
}

impl Detached {
    pub(super) fn take_parent(&mut self) -> Option<NonNull<DentryCache>> {
        self.parent.take()
    }
}

impl DentryManager {
    pub fn new(config: DcacheConfig) -> Arc<Self> {
        let buckets = config.bucket_count();
        log::debug!(
            "dcache: {} buckets, max {} entries, pressure {}",
            buckets,
            config.max_entries,
            config.cache_pressure
        );
        Arc::new(Self {
            config,
            index: DentryIndex::new(buckets),
            tree: SpinMutex::new(TreeState {
                lru: LRUQueue::new(),
            }),
            rename_seq: SeqCount::new(),
            rcu: RcuManager::new(),
            nr_dentry: AtomicUsize::new(0),
        })
    }
    pub fn config(&self) -> &DcacheConfig {
        &self.config
    }
    pub(crate) fn rcu(&self) -> &RcuManager {
        &self.rcu
    }
    pub fn stat(&self) -> DentryStat {
        let tree = self.tree.lock();
        DentryStat {
            nr_dentry: self.nr_dentry.load(Ordering::Relaxed),
            nr_unused: tree.lru.len(),
        }
    }
    /// 等待一个完整的RCU宽限期
    pub fn synchronize(&self) {
        self.rcu.synchronize()
    }
    fn alloc_node(
        &self,
        sb: Arc<SuperBlock>,
        name: NameKey,
        flags: DentryFlags,
    ) -> SysR<NonNull<DentryCache>> {
        let max = self.config.max_entries;
        self.nr_dentry
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| SysError::ENOMEM)?;
        let name = HashName::alloc(name);
        let node = Box::new(DentryCache::new(sb, name, flags));
        Ok(NonNull::from(Box::leak(node)))
    }
    /// 释放从未被其他线程看见的节点
    unsafe fn free_unpublished(&self, node: NonNull<DentryCache>) {
        node.as_ref().count.store(0, Ordering::Relaxed);
        drop(Box::from_raw(node.as_ptr()));
        self.nr_dentry.fetch_sub(1, Ordering::Relaxed);
    }
    /// 在 parent 下创建一个未加入哈希表的负目录项
    pub fn create(self: &Arc<Self>, parent: &Dentry, name: &NameKey) -> SysR<Dentry> {
        parent.check_live();
        let node = self.alloc_node(parent.sb.clone(), name.clone(), DentryFlags::UNHASHED)?;
        let d = unsafe { node.as_ref() };
        // 子目录持有父目录的引用
        parent.count.fetch_add(1, Ordering::Relaxed);
        d.parent.store(parent.ptr(), Ordering::Release);
        let tree = self.tree.lock();
        parent.sub_head.push_prev(&d.sub_node);
        drop(tree);
        if crate::PRINT_OP {
            log::trace!("dcache: create {:?} under {:#x}", name, parent.id());
        }
        Ok(unsafe { Dentry::from_raw(self.clone(), node) })
    }
    /// 文件系统根目录, 不在哈希表中, 最后一个引用释放时销毁
    pub fn create_root(self: &Arc<Self>, sb: &Arc<SuperBlock>, inode: Arc<Inode>) -> SysR<Dentry> {
        let node = self.alloc_node(sb.clone(), NameKey::new(b"/"), DentryFlags::UNHASHED)?;
        let d = unsafe { node.as_ref() };
        d.parent.store(d.ptr(), Ordering::Release);
        let root = unsafe { Dentry::from_raw(self.clone(), node) };
        self.instantiate(&root, inode);
        Ok(root)
    }
    /// 没有路径的inode得到一个断开的目录项, 已有别名时直接返回别名
    pub fn create_anon(self: &Arc<Self>, inode: Arc<Inode>) -> SysR<Dentry> {
        if let Some(alias) = self.find_alias(&inode) {
            return Ok(alias);
        }
        let node = self.alloc_node(
            inode.sb().clone(),
            NameKey::new(b"/"),
            DentryFlags::DISCONNECTED,
        )?;
        let d = unsafe { node.as_ref() };
        d.parent.store(d.ptr(), Ordering::Release);
        let tree = self.tree.lock();
        if let Some(alias) = self.find_alias_locked(&tree, &inode) {
            drop(tree);
            unsafe { self.free_unpublished(node) };
            return Ok(unsafe { Dentry::from_raw(self.clone(), alias) });
        }
        let mut lk = d.inode.lock();
        d.bucket.store(BUCKET_ANON, Ordering::Relaxed);
        inode.aliases.push_prev(&d.alias_node);
        *lk = Some(inode);
        drop(lk);
        drop(tree);
        Ok(unsafe { Dentry::from_raw(self.clone(), node) })
    }
    /// 绑定inode
    ///
    /// 重复绑定是逻辑错误
    pub fn instantiate(&self, entry: &Dentry, inode: Arc<Inode>) {
        let _tree = self.tree.lock();
        let mut lk = entry.inode.lock();
        assert!(lk.is_none(), "dcache: dentry {:#x} already bound", entry.id());
        inode.aliases.push_prev(&entry.alias_node);
        *lk = Some(inode);
    }
    /// 绑定并加入哈希表
    ///
    /// 同名目录项已经存在时返回它, entry 保持不变
    pub fn add(self: &Arc<Self>, entry: &Dentry, inode: Option<Arc<Inode>>) -> Option<Dentry> {
        self.add_locked(self.tree.lock(), entry, inode)
    }
    fn add_locked(
        self: &Arc<Self>,
        tree: TreeGuard<'_>,
        entry: &Dentry,
        inode: Option<Arc<Inode>>,
    ) -> Option<Dentry> {
        let parent = unsafe { &*entry.parent_ptr() };
        let key = unsafe { entry.name_ref() };
        if let Some(dup) = self.find_hashed_locked(&tree, parent, key) {
            if !ptr::eq(dup, &**entry) {
                self.dget_locked(dup);
                drop(tree);
                return Some(unsafe { Dentry::from_raw(self.clone(), NonNull::from(dup)) });
            }
        }
        let mut lk = entry.inode.lock();
        if let Some(inode) = inode {
            assert!(lk.is_none(), "dcache: dentry {:#x} already bound", entry.id());
            inode.aliases.push_prev(&entry.alias_node);
            *lk = Some(inode);
        }
        if !entry.is_hashed() {
            unsafe { self.hash_locked(entry) };
        }
        None
    }
    /// 重新加入哈希表, 同名目录项已经存在时返回 EEXIST
    pub fn rehash(&self, entry: &Dentry) -> SysR<()> {
        let tree = self.tree.lock();
        if entry.is_hashed() {
            return Ok(());
        }
        if entry.is_root() {
            return Err(SysError::EINVAL);
        }
        let parent = unsafe { &*entry.parent_ptr() };
        if self
            .find_hashed_locked(&tree, parent, unsafe { entry.name_ref() })
            .is_some()
        {
            return Err(SysError::EEXIST);
        }
        let _lk = entry.inode.lock();
        unsafe { self.hash_locked(entry) };
        Ok(())
    }
    /// 移出哈希表, 之后的查找看不到它, 最后一个引用释放时销毁
    pub fn unhash(&self, entry: &Dentry) {
        let _tree = self.tree.lock();
        let _lk = entry.inode.lock();
        unsafe { self.unhash_locked(entry) };
    }
    /// 文件被删除
    ///
    /// 唯一的持有者时解除inode绑定变为负目录项并留在哈希表中, 否则移出哈希表
    pub fn delete(&self, entry: &Dentry) {
        let tree = self.tree.lock();
        let mut lk = entry.inode.lock();
        if entry.count() == 1 {
            let inode = lk.take();
            if inode.is_some() {
                entry.alias_node.pop_self();
            }
            drop(lk);
            drop(tree);
            if let Some(inode) = inode {
                entry.sb.fs().target_release(entry, inode);
            }
        } else {
            unsafe { self.unhash_locked(entry) };
        }
    }
    /// # Safety
    ///
    /// 持有结构锁和 d 的节点锁, d 不在哈希表中且不是根
    unsafe fn hash_locked(&self, d: &DentryCache) {
        debug_assert!(!d.is_root());
        let bucket = self.index.bucket_of(d.parent_ptr(), d.name_ref().hash());
        self.index.link(d, bucket);
        d.clear_flags(DentryFlags::UNHASHED);
    }
    /// # Safety
    ///
    /// 持有结构锁和 d 的节点锁
    pub(super) unsafe fn unhash_locked(&self, d: &DentryCache) {
        if !d.is_hashed() {
            return;
        }
        match d.bucket.load(Ordering::Relaxed) {
            BUCKET_NONE => (),
            BUCKET_ANON => d.bucket.store(BUCKET_NONE, Ordering::Relaxed),
            _ => self.index.unlink(d),
        }
        d.set_flags(DentryFlags::UNHASHED);
    }
    /// 在结构锁内查找一个已经加入哈希表的同名目录项
    pub(super) fn find_hashed_locked<'a>(
        &'a self,
        _tree: &TreeState,
        parent: &DentryCache,
        key: &NameKey,
    ) -> Option<&'a DentryCache> {
        let bucket = self.index.bucket_of(parent.ptr(), key.hash());
        let fs = parent.sb.fs();
        unsafe { self.index.iter(bucket) }.find(|d| {
            if !ptr::eq(d.parent_ptr(), parent) || !d.is_hashed() {
                return false;
            }
            let name = unsafe { d.name_ref() };
            name.hash() == key.hash() && fs.custom_compare(name.name(), key.name())
        })
    }
    /// 结构锁内增加引用计数, 可以从0开始
    #[inline]
    pub(super) fn dget_locked(&self, d: &DentryCache) {
        d.count.fetch_add(1, Ordering::Relaxed);
        d.mark_referenced();
    }
    pub(super) fn dget_parent(self: &Arc<Self>, entry: &Dentry) -> Dentry {
        let _tree = self.tree.lock();
        let parent = unsafe { &*entry.parent_ptr() };
        parent.count.fetch_add(1, Ordering::Relaxed);
        unsafe { Dentry::from_raw(self.clone(), NonNull::from(parent)) }
    }
    /// 无锁查找
    ///
    /// 预筛选父目录和哈希值后在节点锁内重新检查所在的桶, 名字和是否已经被移除
    pub fn find(self: &Arc<Self>, parent: &Dentry, key: &NameKey) -> Option<Dentry> {
        let parent_ptr = parent.ptr();
        let fs = parent.sb.fs();
        let _rcu = self.rcu.read_lock();
        let bucket = self.index.bucket_of(parent_ptr, key.hash());
        for d in unsafe { self.index.iter(bucket) } {
            d.check_live();
            if d.parent_ptr() != parent_ptr {
                continue;
            }
            if unsafe { d.name_ref() }.hash() != key.hash() {
                continue;
            }
            let lk = d.inode.lock();
            if d.bucket.load(Ordering::Relaxed) != bucket
                || !d.is_hashed()
                || d.parent_ptr() != parent_ptr
            {
                continue;
            }
            let name = unsafe { d.name_ref() };
            if name.hash() != key.hash() || !fs.custom_compare(name.name(), key.name()) {
                continue;
            }
            d.count.fetch_add(1, Ordering::Relaxed);
            d.mark_referenced();
            drop(lk);
            if crate::PRINT_OP {
                log::trace!("dcache: hit {:?} in {:#x}", key, parent.id());
            }
            return Some(unsafe { Dentry::from_raw(self.clone(), NonNull::from(d)) });
        }
        None
    }
    /// 查找未命中时如果期间发生了重命名则重试
    ///
    /// 命中时不检查序列号: 父目录, 哈希桶和名字已经在节点锁内重新验证,
    /// 返回的就是此刻位于 (parent, name) 的目录项. 之后的重命名可能立即改变它,
    /// 这与检查后再返回没有区别, 所以只有未命中需要重试.
    pub fn lookup(self: &Arc<Self>, parent: &Dentry, key: &NameKey) -> Option<Dentry> {
        loop {
            let seq = self.rename_seq.read_begin();
            let ret = self.find(parent, key);
            if ret.is_some() || !self.rename_seq.read_retry(seq) {
                return ret;
            }
        }
    }
    /// 已经加入哈希表的别名, 优先返回连接到目录树的
    ///
    /// 文件系统根目录不在哈希表中, 但它是目录唯一的别名, 同样返回
    pub fn find_alias(self: &Arc<Self>, inode: &Inode) -> Option<Dentry> {
        let tree = self.tree.lock();
        let alias = self.find_alias_locked(&tree, inode)?;
        drop(tree);
        Some(unsafe { Dentry::from_raw(self.clone(), alias) })
    }
    /// 找到时已经增加了引用计数
    pub(super) fn find_alias_locked(
        &self,
        _tree: &TreeState,
        inode: &Inode,
    ) -> Option<NonNull<DentryCache>> {
        let mut discon = None;
        for p in unsafe { inode.aliases.iter() } {
            let d = unsafe { p.as_ref() };
            let fs_root = inode.is_dir() && d.is_root() && !d.is_disconnected();
            if !d.is_hashed() && !fs_root {
                continue;
            }
            if !d.is_disconnected() {
                self.dget_locked(d);
                return Some(p);
            }
            if discon.is_none() {
                discon = Some(p);
            }
        }
        let p = discon?;
        self.dget_locked(unsafe { p.as_ref() });
        Some(p)
    }
    /// 目录只能有一个别名: 如果存在断开的别名就把它移动到 fallback 的位置并返回它,
    /// 否则绑定 fallback 并加入哈希表
    ///
    /// 检查和绑定在同一次结构锁内完成, 与 `create_anon` 互斥
    pub fn splice_alias(
        self: &Arc<Self>,
        inode: Option<Arc<Inode>>,
        fallback: &Dentry,
    ) -> Option<Dentry> {
        let inode = match inode {
            Some(inode) if inode.is_dir() => inode,
            inode => return self.add(fallback, inode),
        };
        let tree = self.tree.lock();
        let Some(p) = self.find_disconnected_locked(&tree, &inode) else {
            return self.add_locked(tree, fallback, Some(inode));
        };
        let alias = unsafe { Dentry::from_raw(self.clone(), p) };
        let parent = unsafe { &*fallback.parent_ptr() };
        if crate::PRINT_MOVE {
            log::trace!("dcache: splice {:#x} into {:#x}", alias.id(), fallback.id());
        }
        let mut mv = self.begin_move_locked(tree);
        mv.move_locked(&alias, MoveTarget::Replace(&**fallback), parent)
            .unwrap_or_else(|e| panic!("dcache: splice into unhashed fallback failed: {}", e));
        drop(mv);
        Some(alias)
    }
    fn find_disconnected_locked(
        &self,
        _tree: &TreeState,
        inode: &Inode,
    ) -> Option<NonNull<DentryCache>> {
        for p in unsafe { inode.aliases.iter() } {
            let d = unsafe { p.as_ref() };
            if d.is_hashed() && d.is_disconnected() {
                self.dget_locked(d);
                return Some(p);
            }
        }
        None
    }
    /// 销毁 inode 全部未使用的别名, 返回销毁的数量
    pub fn prune_aliases(&self, inode: &Inode) -> usize {
        let mut n = 0;
        loop {
            let tree = self.tree.lock();
            let victim = unsafe { inode.aliases.iter() }.find(|p| unsafe { p.as_ref() }.count() == 0);
            let Some(p) = victim else {
                break;
            };
            let d = unsafe { p.as_ref() };
            let lk = d.inode.lock();
            self.dget_locked(d);
            unsafe { self.unhash_locked(d) };
            drop(lk);
            drop(tree);
            self.dput(p);
            n += 1;
        }
        n
    }
    /// 释放一个引用
    ///
    /// 计数归零时: 已经移出哈希表则销毁, 否则由文件系统决定进入LRU或销毁.
    /// 销毁后继续释放父目录的引用.
    pub(crate) fn dput(&self, node: NonNull<DentryCache>) {
        let mut node = node;
        loop {
            let d = unsafe { node.as_ref() };
            d.check_live();
            let mut cur = d.count.load(Ordering::Relaxed);
            while cur > 1 {
                match d.count.compare_exchange_weak(
                    cur,
                    cur - 1,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(v) => cur = v,
                }
            }
            let mut tree = self.tree.lock();
            let lk = d.inode.lock();
            let old = d.count.fetch_sub(1, Ordering::AcqRel);
            assert!(old != 0, "dcache: negative reference count on {:#x}", d.id());
            if old > 1 {
                return;
            }
            if d.is_hashed() {
                match d.sb.fs().delete_policy(d, lk.as_deref()) {
                    DeletePolicy::Keep => {
                        if LRUQueue::contains(d) {
                            d.mark_referenced();
                        } else {
                            tree.lru.push_newest(d);
                        }
                        if crate::PRINT_INTO_LRU {
                            log::trace!("dcache: {:#x} into lru ({})", d.id(), tree.lru.len());
                        }
                        return;
                    }
                    DeletePolicy::Unhash => unsafe { self.unhash_locked(d) },
                }
            }
            let det = self.detach_locked(&mut tree, d, lk);
            drop(tree);
            match self.finish_kill(det) {
                Some(parent) => node = parent,
                None => return,
            }
        }
    }
    /// 结构锁内释放一个引用, 归零的目录项只进入LRU, 由之后的扫描销毁
    pub(super) fn put_deferred_locked(&self, tree: &mut TreeState, d: &DentryCache) {
        let lk = d.inode.lock();
        let old = d.count.fetch_sub(1, Ordering::AcqRel);
        assert!(old != 0, "dcache: negative reference count on {:#x}", d.id());
        if old > 1 {
            return;
        }
        if d.is_hashed() && d.sb.fs().delete_policy(d, lk.as_deref()) == DeletePolicy::Unhash {
            unsafe { self.unhash_locked(d) };
        }
        drop(lk);
        if LRUQueue::contains(d) {
            d.mark_referenced();
        } else {
            tree.lru.push_newest(d);
        }
    }
    /// 从LRU, 父目录和别名链表中摘下, 调用者持有结构锁且计数为0
    pub(super) fn detach_locked(
        &self,
        tree: &mut TreeState,
        d: &DentryCache,
        mut lk: MutexGuard<'_, Option<Arc<Inode>>>,
    ) -> Detached {
        debug_assert!(!d.is_hashed());
        debug_assert_eq!(d.count(), 0);
        debug_assert!(d.sub_head.is_empty(), "dcache: killing dentry with children");
        tree.lru.remove(d);
        let parent = if d.is_root() {
            None
        } else {
            d.sub_node.pop_self();
            NonNull::new(d.parent_ptr())
        };
        let inode = lk.take();
        if inode.is_some() {
            d.alias_node.pop_self();
        }
        drop(lk);
        Detached {
            node: NonNull::from(d),
            inode,
            parent,
        }
    }
    /// 解锁后调用文件系统钩子并交给RCU回收, 返回需要释放引用的父目录
    pub(super) fn finish_kill(&self, det: Detached) -> Option<NonNull<DentryCache>> {
        let d = unsafe { det.node.as_ref() };
        let fs = d.sb.fs();
        if let Some(inode) = det.inode {
            fs.target_release(d, inode);
        }
        fs.release(d);
        if crate::PRINT_OP {
            log::trace!("dcache: kill {:#x}", d.id());
        }
        self.nr_dentry.fetch_sub(1, Ordering::Relaxed);
        unsafe { self.rcu.rcu_drop(det.node) };
        det.parent
    }
    #[cfg(test)]
    pub(crate) fn check(&self) {
        self.tree.lock().lru.check();
    }
    #[cfg(test)]
    pub(crate) fn nr_aliases(&self, inode: &Inode) -> usize {
        let _tree = self.tree.lock();
        unsafe { inode.aliases.iter() }.count()
    }
    #[cfg(test)]
    pub(crate) fn bucket_of(&self, parent: usize, key: &NameKey) -> usize {
        self.index.bucket_of(parent as *const DentryCache, key.hash())
    }
}

impl Drop for DentryManager {
    fn drop(&mut self) {
        let mut total = 0;
        loop {
            // 第一轮只清除 REFERENCED 的目录项
            let n = self.prune(usize::MAX) + self.prune(usize::MAX);
            if n == 0 {
                break;
            }
            total += n;
        }
        let left = self.nr_dentry.load(Ordering::Relaxed);
        if left != 0 {
            log::warn!("dcache: {} dentries leaked at teardown", left);
        }
        self.rcu.synchronize();
        log::debug!("dcache: teardown released {} dentries", total);
    }
}
