//! 内存文件系统
//!
//! 只保存目录结构, 没有文件内容. inode缓存保存弱引用, 同一个inode号同时只有
//! 一个 `Inode` 对象存活. 名字被删除并且inode被释放后节点才被回收.

mod node;

use core::{
    ptr,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use alloc::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec::Vec,
};
use spin::Mutex as SpinMutex;

use crate::{
    dentry::DentryCache,
    error::{SysError, SysR},
    fssp::{DeletePolicy, Fs, SuperBlock},
    hash_name::{hash_name, NameHash, NameHasher},
    inode::{Inode, InodeKind},
};

use self::node::MemNode;

pub const ROOT_INO: u64 = 1;

/// 钩子调用计数
#[derive(Default)]
pub struct MemFsStat {
    pub evict: AtomicUsize,
    pub release: AtomicUsize,
    pub target_release: AtomicUsize,
    /// 仍然存在的节点
    pub nodes: AtomicUsize,
}

impl MemFsStat {
    pub fn evict(&self) -> usize {
        self.evict.load(Ordering::Relaxed)
    }
    pub fn release(&self) -> usize {
        self.release.load(Ordering::Relaxed)
    }
    pub fn target_release(&self) -> usize {
        self.target_release.load(Ordering::Relaxed)
    }
    pub fn nodes(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }
}

struct MemState {
    nodes: BTreeMap<u64, MemNode>,
    icache: BTreeMap<u64, Weak<Inode>>,
}

impl MemState {
    fn node(&self, ino: u64) -> SysR<&MemNode> {
        self.nodes.get(&ino).ok_or(SysError::ENOENT)
    }
    fn node_mut(&mut self, ino: u64) -> SysR<&mut MemNode> {
        self.nodes.get_mut(&ino).ok_or(SysError::ENOENT)
    }
    fn inode_alive(&self, ino: u64) -> bool {
        self.icache
            .get(&ino)
            .map_or(false, |w| w.strong_count() != 0)
    }
}

pub struct MemFs {
    ino_alloc: AtomicU64,
    /// 名字不区分ASCII大小写
    fold_case: bool,
    always_unhash: bool,
    state: SpinMutex<MemState>,
    stat: Arc<MemFsStat>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_INO, MemNode::new(InodeKind::Dir));
        let stat = Arc::new(MemFsStat::default());
        stat.nodes.store(1, Ordering::Relaxed);
        Self {
            ino_alloc: AtomicU64::new(ROOT_INO + 1),
            fold_case: false,
            always_unhash: false,
            state: SpinMutex::new(MemState {
                nodes,
                icache: BTreeMap::new(),
            }),
            stat,
        }
    }
    pub fn fold_case(mut self) -> Self {
        self.fold_case = true;
        self
    }
    /// 引用计数归零的目录项立即销毁而不是进入LRU
    pub fn always_unhash(mut self) -> Self {
        self.always_unhash = true;
        self
    }
    pub fn stat(&self) -> Arc<MemFsStat> {
        self.stat.clone()
    }
    fn fold(&self, name: &[u8]) -> Vec<u8> {
        if self.fold_case {
            name.to_ascii_lowercase()
        } else {
            name.to_vec()
        }
    }
    /// 不会在锁内释放 `Inode`
    fn inode_locked(state: &mut MemState, sb: &Arc<SuperBlock>, ino: u64) -> SysR<Arc<Inode>> {
        if let Some(inode) = state.icache.get(&ino).and_then(Weak::upgrade) {
            return Ok(inode);
        }
        let kind = state.node(ino)?.kind;
        let inode = Inode::new(ino, kind, sb.clone());
        state.icache.insert(ino, Arc::downgrade(&inode));
        Ok(inode)
    }
    /// 没有名字也没有存活的inode时回收节点
    fn try_free_locked(&self, state: &mut MemState, ino: u64) {
        let dead = state.nodes.get(&ino).map_or(false, |n| n.nlink == 0);
        if dead && !state.inode_alive(ino) {
            state.nodes.remove(&ino);
            state.icache.remove(&ino);
            self.stat.nodes.fetch_sub(1, Ordering::Relaxed);
        }
    }
    fn drop_name_locked(&self, state: &mut MemState, ino: u64) -> SysR<()> {
        let node = state.node_mut(ino)?;
        node.nlink = match node.kind {
            InodeKind::Dir => 0,
            InodeKind::File => node.nlink.saturating_sub(1),
        };
        self.try_free_locked(state, ino);
        Ok(())
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Fs for MemFs {
    fn name(&self) -> &str {
        "memfs"
    }
    fn root(&self, sb: &Arc<SuperBlock>) -> SysR<Arc<Inode>> {
        Self::inode_locked(&mut self.state.lock(), sb, ROOT_INO)
    }
    fn lookup(&self, sb: &Arc<SuperBlock>, dir: &Inode, name: &[u8]) -> SysR<Option<Arc<Inode>>> {
        let mut state = self.state.lock();
        match state.node(dir.ino())?.search(&self.fold(name))? {
            Some(ino) => Self::inode_locked(&mut state, sb, ino).map(Some),
            None => Ok(None),
        }
    }
    fn create(
        &self,
        sb: &Arc<SuperBlock>,
        dir: &Inode,
        name: &[u8],
        kind: InodeKind,
    ) -> SysR<Arc<Inode>> {
        let mut state = self.state.lock();
        let ino = self.ino_alloc.fetch_add(1, Ordering::Relaxed);
        state.node_mut(dir.ino())?.insert(self.fold(name), ino)?;
        state.nodes.insert(ino, MemNode::new(kind));
        self.stat.nodes.fetch_add(1, Ordering::Relaxed);
        Self::inode_locked(&mut state, sb, ino)
    }
    fn link(&self, dir: &Inode, name: &[u8], target: &Inode) -> SysR<()> {
        let mut state = self.state.lock();
        if state.node(target.ino())?.kind == InodeKind::Dir {
            return Err(SysError::EISDIR);
        }
        state
            .node_mut(dir.ino())?
            .insert(self.fold(name), target.ino())?;
        state.node_mut(target.ino())?.nlink += 1;
        Ok(())
    }
    fn unlink(&self, dir: &Inode, name: &[u8], target: &Inode) -> SysR<()> {
        let mut state = self.state.lock();
        let ino = state.node_mut(dir.ino())?.remove(&self.fold(name))?;
        debug_assert_eq!(ino, target.ino());
        self.drop_name_locked(&mut state, ino)
    }
    fn rmdir(&self, dir: &Inode, name: &[u8], target: &Inode) -> SysR<()> {
        let mut state = self.state.lock();
        let name = self.fold(name);
        let ino = state
            .node(dir.ino())?
            .search(&name)?
            .ok_or(SysError::ENOENT)?;
        debug_assert_eq!(ino, target.ino());
        if !state.node(ino)?.is_empty() {
            return Err(SysError::ENOTEMPTY);
        }
        state.node_mut(dir.ino())?.remove(&name)?;
        self.drop_name_locked(&mut state, ino)
    }
    fn rename(
        &self,
        old_dir: &Inode,
        old_name: &[u8],
        new_dir: &Inode,
        new_name: &[u8],
    ) -> SysR<()> {
        let mut state = self.state.lock();
        let (old_name, new_name) = (self.fold(old_name), self.fold(new_name));
        let ino = state
            .node(old_dir.ino())?
            .search(&old_name)?
            .ok_or(SysError::ENOENT)?;
        if let Some(victim) = state.node(new_dir.ino())?.search(&new_name)? {
            if victim == ino {
                return Ok(());
            }
            let v = state.node(victim)?;
            if v.kind == InodeKind::Dir && !v.is_empty() {
                return Err(SysError::ENOTEMPTY);
            }
            state.node_mut(new_dir.ino())?.remove(&new_name)?;
            self.drop_name_locked(&mut state, victim)?;
        }
        state.node_mut(old_dir.ino())?.remove(&old_name)?;
        state.node_mut(new_dir.ino())?.insert(new_name, ino)
    }
    fn get_inode(&self, sb: &Arc<SuperBlock>, ino: u64) -> SysR<Arc<Inode>> {
        let mut state = self.state.lock();
        if state.node(ino)?.nlink == 0 {
            return Err(SysError::ENOENT);
        }
        Self::inode_locked(&mut state, sb, ino)
    }
    fn custom_hash(&self, name: &[u8]) -> NameHash {
        if !self.fold_case {
            return hash_name(name);
        }
        use core::hash::Hasher;
        let mut h = NameHasher::default();
        for &c in name {
            h.write_u8(c.to_ascii_lowercase());
        }
        NameHash(h.finish())
    }
    fn custom_compare(&self, stored: &[u8], name: &[u8]) -> bool {
        if self.fold_case {
            stored.eq_ignore_ascii_case(name)
        } else {
            stored == name
        }
    }
    fn delete_policy(&self, _entry: &DentryCache, _inode: Option<&Inode>) -> DeletePolicy {
        if self.always_unhash {
            DeletePolicy::Unhash
        } else {
            DeletePolicy::Keep
        }
    }
    fn release(&self, _entry: &DentryCache) {
        self.stat.release.fetch_add(1, Ordering::Relaxed);
    }
    fn target_release(&self, _entry: &DentryCache, inode: Arc<Inode>) {
        self.stat.target_release.fetch_add(1, Ordering::Relaxed);
        drop(inode);
    }
    fn evict(&self, inode: &Inode) {
        self.stat.evict.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let ino = inode.ino();
        let current = state
            .icache
            .get(&ino)
            .map_or(false, |w| ptr::eq(w.as_ptr(), inode));
        if current {
            state.icache.remove(&ino);
        }
        self.try_free_locked(&mut state, ino);
    }
}
