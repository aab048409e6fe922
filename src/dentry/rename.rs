//! 重命名
//!
//! 移动在结构锁内进行, 同时序列号为奇数. 查找未命中时如果序列号变化需要重试,
//! 因为被移动的目录项会把正在遍历旧哈希链的读者带到新的哈希链上.

use core::{
    ptr::{self, NonNull},
    sync::atomic::Ordering,
};

use alloc::vec::Vec;

use crate::{
    error::{SysError, SysR},
    hash_name::{HashName, NameKey},
};

use super::{
    manager::{DentryManager, TreeGuard, TreeState},
    Dentry, DentryCache, DentryFlags,
};

#[derive(Clone, Copy)]
pub(crate) enum MoveTarget<'a> {
    /// 取代目标的名字和位置, 目标被移出哈希表并得到原来的名字
    Replace(&'a DentryCache),
    /// 新名字
    Rename(&'a NameKey),
}

/// 持有结构锁和序列号写者身份
///
/// 析构时结束移动, 解锁后再释放旧父目录的引用和旧名字
pub struct MoveGuard<'a> {
    mgr: &'a DentryManager,
    tree: Option<TreeGuard<'a>>,
    put: Vec<NonNull<DentryCache>>,
    names: Vec<NonNull<HashName>>,
}

impl DentryManager {
    pub fn begin_move(&self) -> MoveGuard<'_> {
        self.begin_move_locked(self.tree.lock())
    }
    /// 已经持有结构锁时开始移动
    pub(crate) fn begin_move_locked<'a>(&'a self, tree: TreeGuard<'a>) -> MoveGuard<'a> {
        unsafe { self.rename_seq.write_begin() };
        MoveGuard {
            mgr: self,
            tree: Some(tree),
            put: Vec::new(),
            names: Vec::new(),
        }
    }
    /// 单次移动
    pub fn rename(
        &self,
        entry: &Dentry,
        new_parent: &Dentry,
        new_name: &NameKey,
        replaced: Option<&Dentry>,
    ) -> SysR<()> {
        let mut mv = self.begin_move();
        let ret = mv.move_entry(entry, new_parent, new_name, replaced);
        mv.end_move();
        ret
    }
    /// a 是否是 b 或位于 b 之下
    pub fn is_subdir(&self, a: &Dentry, b: &Dentry) -> bool {
        if a.ptr_eq(b) {
            return true;
        }
        self.rename_seq.read(|| {
            let _rcu = self.rcu().read_lock();
            let mut p: &DentryCache = a;
            loop {
                if ptr::eq(p, &**b) {
                    return true;
                }
                if p.is_root() {
                    return false;
                }
                p = unsafe { &*p.parent_ptr() };
            }
        })
    }
}

impl MoveGuard<'_> {
    pub(crate) fn tree(&mut self) -> &mut TreeState {
        match self.tree.as_mut() {
            Some(tree) => &mut **tree,
            None => unreachable!(),
        }
    }
    /// 把 entry 移动到 new_parent 下的 new_name
    ///
    /// replaced 为目标位置上已有的目录项, 它会被移出哈希表.
    /// 没有 replaced 且目标位置已经存在时返回 EEXIST.
    pub fn move_entry(
        &mut self,
        entry: &Dentry,
        new_parent: &Dentry,
        new_name: &NameKey,
        replaced: Option<&Dentry>,
    ) -> SysR<()> {
        match replaced {
            Some(target) => {
                assert!(
                    ptr::eq(target.parent_ptr(), new_parent.ptr()),
                    "dcache: replaced dentry is not in the destination directory"
                );
                self.move_locked(entry, MoveTarget::Replace(&**target), new_parent)
            }
            None => self.move_locked(entry, MoveTarget::Rename(new_name), new_parent),
        }
    }
    pub fn end_move(self) {}

    pub(crate) fn move_locked(
        &mut self,
        entry: &DentryCache,
        target: MoveTarget<'_>,
        new_parent: &DentryCache,
    ) -> SysR<()> {
        let mgr = self.mgr;
        if let MoveTarget::Replace(t) = target {
            if ptr::eq(t, entry) {
                return Ok(());
            }
        }
        // 父目录链上出现自身说明会形成环
        let mut p = new_parent;
        loop {
            assert!(
                !ptr::eq(p, entry),
                "dcache: moving {:#x} under itself",
                entry.id()
            );
            if p.is_root() {
                break;
            }
            p = unsafe { &*p.parent_ptr() };
        }
        if let MoveTarget::Rename(name) = target {
            let tree = self.tree();
            if let Some(dup) = mgr.find_hashed_locked(tree, new_parent, name) {
                if !ptr::eq(dup, entry) {
                    return Err(SysError::EEXIST);
                }
            }
        }
        let entry_lk = entry.inode.lock();
        let old_parent = entry.parent_ptr();
        let was_root = entry.is_root();
        unsafe { mgr.unhash_locked(entry) };
        match target {
            MoveTarget::Replace(t) => {
                let _target_lk = t.inode.lock();
                unsafe { mgr.unhash_locked(t) };
                let en = entry.name.load(Ordering::Relaxed);
                let tn = t.name.swap(en, Ordering::AcqRel);
                entry.name.store(tn, Ordering::Release);
                let tp = t.parent_ptr();
                t.sub_node.pop_self();
                entry.sub_node.pop_self();
                // 父目录引用随位置一起转移
                if was_root {
                    entry.parent.store(tp, Ordering::Release);
                    t.parent.store(t.ptr(), Ordering::Release);
                    entry.clear_flags(DentryFlags::DISCONNECTED);
                } else {
                    entry.parent.store(tp, Ordering::Release);
                    t.parent.store(old_parent, Ordering::Release);
                    unsafe { (*old_parent).sub_head.push_prev(&t.sub_node) };
                }
                unsafe { (*tp).sub_head.push_prev(&entry.sub_node) };
            }
            MoveTarget::Rename(name) => {
                let new = HashName::alloc(name.clone());
                let old = entry.name.swap(new.as_ptr(), Ordering::AcqRel);
                if let Some(old) = NonNull::new(old) {
                    self.names.push(old);
                }
                if !ptr::eq(new_parent, old_parent) {
                    new_parent.count.fetch_add(1, Ordering::Relaxed);
                    entry.parent.store(new_parent.ptr(), Ordering::Release);
                    if was_root {
                        entry.clear_flags(DentryFlags::DISCONNECTED);
                    } else {
                        entry.sub_node.pop_self();
                        if let Some(old_parent) = NonNull::new(old_parent) {
                            self.put.push(old_parent);
                        }
                    }
                    new_parent.sub_head.push_prev(&entry.sub_node);
                }
            }
        }
        let bucket = mgr
            .index
            .bucket_of(entry.parent_ptr(), unsafe { entry.name_ref() }.hash());
        unsafe { mgr.index.link(entry, bucket) };
        entry.clear_flags(DentryFlags::UNHASHED);
        drop(entry_lk);
        if crate::PRINT_MOVE {
            log::trace!(
                "dcache: move {:#x} {:?} -> parent {:#x}",
                entry.id(),
                unsafe { entry.name_ref() },
                entry.parent_ptr() as usize
            );
        }
        Ok(())
    }
}

impl Drop for MoveGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.mgr.rename_seq.write_end() };
        self.tree = None;
        for name in self.names.drain(..) {
            unsafe { self.mgr.rcu().rcu_drop(name) };
        }
        for parent in self.put.drain(..) {
            self.mgr.dput(parent);
        }
    }
}
