use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use spin::Mutex as SpinMutex;

use crate::{
    dentry::DentryCache,
    error::{SysError, SysR},
};

use super::Mount;

/// 管理全局挂载点, 持有每个挂载点的所有权
///
/// 索引: (父挂载点, 挂载位置目录项)
pub struct MountManager {
    next_id: AtomicUsize,
    mounts: SpinMutex<BTreeMap<(usize, usize), Arc<Mount>>>,
}

impl MountManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            mounts: SpinMutex::new(BTreeMap::new()),
        }
    }
    pub(crate) fn alloc_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
    fn key(m: &Mount) -> Option<(usize, usize)> {
        Some((m.parent()?.id(), m.mountpoint()?.id()))
    }
    pub(crate) fn insert(&self, m: Arc<Mount>) -> SysR<()> {
        let key = Self::key(&m).ok_or(SysError::EINVAL)?;
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(&key) {
            return Err(SysError::EBUSY);
        }
        mounts.insert(key, m);
        Ok(())
    }
    /// 挂载在 parent 的 d 上的文件系统
    pub(crate) fn lookup(&self, parent: &Mount, d: &DentryCache) -> Option<Arc<Mount>> {
        self.mounts.lock().get(&(parent.id(), d.id())).cloned()
    }
    fn has_children_locked(mounts: &BTreeMap<(usize, usize), Arc<Mount>>, m: &Mount) -> bool {
        mounts
            .range((m.id(), 0)..=(m.id(), usize::MAX))
            .next()
            .is_some()
    }
    /// 在表锁内检查并移除挂载点, 有子挂载点时返回 EBUSY
    pub(crate) fn remove_with(
        &self,
        m: &Arc<Mount>,
        check: impl FnOnce() -> SysR<()>,
    ) -> SysR<Arc<Mount>> {
        let key = Self::key(m).ok_or(SysError::EBUSY)?;
        let mut mounts = self.mounts.lock();
        if Self::has_children_locked(&mounts, m) {
            return Err(SysError::EBUSY);
        }
        check()?;
        mounts.remove(&key).ok_or(SysError::EINVAL)
    }
    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// 取出全部挂载点, 后挂载的在前
    pub(crate) fn drain(&self) -> Vec<Arc<Mount>> {
        let mounts = core::mem::take(&mut *self.mounts.lock());
        let mut v: Vec<Arc<Mount>> = mounts.into_values().collect();
        v.sort_by(|a, b| b.id().cmp(&a.id()));
        v
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}
