//! LRU回收
//!
//! 目录项在 ACTIVE(计数>0) -> IDLE_FRESH(LRU中, 有REFERENCED) -> IDLE_STALE(LRU中)
//! -> RECLAIMED 之间转换. 扫描从最旧的一端开始, REFERENCED 的目录项被清除标记后
//! 移到最新的一端.

use core::ptr;

use alloc::sync::Arc;

use crate::{
    error::{SysError, SysR},
    fssp::SuperBlock,
};

use super::{
    manager::{DentryManager, TreeGuard},
    Dentry, DentryCache, DentryFlags,
};

/// 非递归遍历 root 的全部后代, f 返回true时停止并返回true
///
/// 调用者持有结构锁
fn walk_subtree(root: &DentryCache, mut f: impl FnMut(&DentryCache) -> bool) -> bool {
    let mut this = root;
    let mut next = root.sub_head.first();
    loop {
        match next {
            Some(child) => {
                let c = unsafe { child.as_ref() };
                if f(c) {
                    return true;
                }
                this = c;
                next = c.sub_head.first();
            }
            None => {
                if ptr::eq(this, root) {
                    return false;
                }
                let parent = unsafe { &*this.parent_ptr() };
                next = this.sub_node.next_in(&parent.sub_head);
                this = parent;
            }
        }
    }
}

impl DentryManager {
    /// 从最旧的一端回收最多 count 个未使用的目录项, 返回回收的数量
    ///
    /// 每个目录项在一次调用中最多被检查一次
    pub fn prune(&self, count: usize) -> usize {
        let tree = self.tree.lock();
        let scan = tree.lru.len();
        let freed = self.prune_locked(tree, scan, count, false);
        if freed != 0 {
            log::debug!("dcache: prune {} of {} requested", freed, count);
        }
        freed
    }
    /// 内存压力回收, 扫描数量按 cache_pressure 缩放
    ///
    /// 结构锁被占用时直接返回, 不分配内存. 父目录因此归零时只放回LRU.
    pub fn shrink_for_pressure(&self, requested: usize) -> usize {
        let pressure = self.config().cache_pressure;
        if requested == 0 || pressure == 0 {
            return 0;
        }
        let Some(tree) = self.tree.try_lock() else {
            return 0;
        };
        let scan = (requested.saturating_mul(pressure) / 100).min(tree.lru.len());
        let freed = self.prune_locked(tree, scan, scan, true);
        log::debug!(
            "dcache: pressure {} requested {} freed {}",
            pressure,
            requested,
            freed
        );
        freed
    }
    /// 最多检查 scan 个目录项, 回收最多 limit 个
    fn prune_locked<'a>(
        &'a self,
        mut tree: TreeGuard<'a>,
        mut scan: usize,
        limit: usize,
        nonblock: bool,
    ) -> usize {
        let mut freed = 0;
        while scan > 0 && freed < limit {
            scan -= 1;
            let Some(node) = tree.lru.pop_oldest() else {
                break;
            };
            let d = unsafe { node.as_ref() };
            let lk = d.inode.lock();
            if d.count() != 0 {
                // 已经被重新引用, 惰性移出
                continue;
            }
            if d.flags().contains(DentryFlags::REFERENCED) {
                d.clear_flags(DentryFlags::REFERENCED);
                tree.lru.push_newest(d);
                continue;
            }
            unsafe { self.unhash_locked(d) };
            let mut det = self.detach_locked(&mut tree, d, lk);
            if nonblock {
                // 父目录的引用在锁内释放, 解锁后不再需要结构锁
                if let Some(parent) = det.take_parent() {
                    self.put_deferred_locked(&mut tree, unsafe { parent.as_ref() });
                }
            }
            drop(tree);
            if let Some(parent) = self.finish_kill(det) {
                self.dput(parent);
            }
            freed += 1;
            tree = if nonblock {
                match self.tree.try_lock() {
                    Some(tree) => tree,
                    None => return freed,
                }
            } else {
                self.tree.lock()
            };
        }
        freed
    }
    /// 回收 root 之下全部未使用的目录项, root 本身不受影响
    pub fn shrink_subtree(&self, root: &Dentry) -> usize {
        let mut freed = 0;
        loop {
            let mut tree = self.tree.lock();
            let mut found = 0;
            walk_subtree(root, |d| {
                if d.count() == 0 {
                    tree.lru.remove(d);
                    d.clear_flags(DentryFlags::REFERENCED);
                    tree.lru.push_oldest(d);
                    found += 1;
                }
                false
            });
            if found == 0 {
                break;
            }
            freed += self.prune_locked(tree, found, found, false);
        }
        if freed != 0 {
            log::debug!("dcache: shrink subtree {:#x} freed {}", root.id(), freed);
        }
        freed
    }
    /// 回收一个文件系统的全部未使用目录项
    pub fn shrink_sb(&self, sb: &Arc<SuperBlock>) -> usize {
        let mut freed = 0;
        loop {
            let mut tree = self.tree.lock();
            let found = tree.lru.move_to_oldest(|d| {
                if Arc::ptr_eq(d.sb(), sb) && d.count() == 0 {
                    d.clear_flags(DentryFlags::REFERENCED);
                    true
                } else {
                    false
                }
            });
            if found == 0 {
                break;
            }
            freed += self.prune_locked(tree, found, found, false);
        }
        log::debug!("dcache: shrink {:?} freed {}", sb, freed);
        freed
    }
    /// 让目录项失效
    ///
    /// 先回收它的子树, 之后仍被使用的目录返回 EBUSY, 其余情况移出哈希表
    pub fn invalidate(&self, entry: &Dentry) -> SysR<()> {
        let tree = self.tree.lock();
        if !entry.is_hashed() {
            return Ok(());
        }
        let has_children = !entry.sub_head.is_empty();
        drop(tree);
        if has_children {
            self.shrink_subtree(entry);
        }
        let _tree = self.tree.lock();
        let lk = entry.inode.lock();
        let is_dir = lk.as_ref().map_or(false, |i| i.is_dir());
        if is_dir && entry.count() > 1 {
            return Err(SysError::EBUSY);
        }
        unsafe { self.unhash_locked(entry) };
        drop(lk);
        Ok(())
    }
    /// entry 或它的任何后代是挂载点
    pub fn have_submounts(&self, entry: &Dentry) -> bool {
        if entry.is_mountpoint() {
            return true;
        }
        let _tree = self.tree.lock();
        walk_subtree(entry, |d| d.is_mountpoint())
    }
    pub fn has_children(&self, entry: &Dentry) -> bool {
        let _tree = self.tree.lock();
        !entry.sub_head.is_empty()
    }
}
