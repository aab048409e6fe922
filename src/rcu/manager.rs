use core::{
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Mutex as SpinMutex;

use super::{rcu_release_fn, RcuCollect, RcuReadGuard, RetireList};

/// RCU 回收系统
///
/// 运行方式:
///
/// 读者按进入时 epoch 的奇偶登记在 readers[epoch & 1] 上.
///
/// 管理器包含两个集合, current / pending. 新回收的对象只进入 pending,
/// current 只能从 pending 转换而来.
///
/// 推进 epoch (e -> e+1) 时要求 readers[(e+1) & 1] (即 e-1 的读者) 为 0:
///     释放 current, 因为它们在 e 开始之前就已经被移除
///     转移 pending 至 current
///
/// 因此一个对象最多经过两次推进就会被释放.
pub struct RcuManager {
    epoch: AtomicUsize,
    readers: [AtomicUsize; 2],
    lists: SpinMutex<CP>,
}

struct CP {
    current: RetireList,
    pending: RetireList,
}

impl RcuManager {
    pub const fn new() -> Self {
        Self {
            epoch: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            lists: SpinMutex::new(CP {
                current: RetireList::new(),
                pending: RetireList::new(),
            }),
        }
    }
    /// 进入读临界区
    #[must_use]
    #[inline]
    pub fn read_lock(&self) -> RcuReadGuard<'_> {
        loop {
            let e = self.epoch.load(Ordering::SeqCst);
            let idx = e & 1;
            self.readers[idx].fetch_add(1, Ordering::SeqCst);
            // 登记期间epoch被推进时重新登记, 防止登记到已经完成检查的一侧
            if self.epoch.load(Ordering::SeqCst) == e {
                return RcuReadGuard {
                    manager: self,
                    idx,
                    _not_send: PhantomData,
                };
            }
            self.readers[idx].fetch_sub(1, Ordering::SeqCst);
        }
    }
    #[inline]
    pub(super) fn read_unlock(&self, idx: usize) {
        let prev = self.readers[idx].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev != 0);
    }
    /// 延迟析构 `ptr`
    ///
    /// # Safety
    ///
    /// ptr 由 `Box` 分配且已经从所有共享结构中移除, 调用者放弃所有权
    pub unsafe fn rcu_drop<T: RcuCollect>(&self, ptr: NonNull<T>) {
        let head = ptr.as_ref().rcu_head();
        assert!(!head.is_queued(), "rcu_drop twice");
        head.release.set(Some(rcu_release_fn::<T>));
        self.lists.lock().pending.push(NonNull::from(head));
        self.try_advance();
    }
    /// 尝试推进一次epoch, 不会阻塞
    ///
    /// 可以在读临界区内调用
    pub fn try_advance(&self) -> bool {
        let Some(mut lists) = self.lists.try_lock() else {
            return false;
        };
        let e = self.epoch.load(Ordering::SeqCst);
        if self.readers[(e + 1) & 1].load(Ordering::SeqCst) != 0 {
            return false;
        }
        let free = lists.current.take();
        lists.current = lists.pending.take();
        self.epoch.store(e.wrapping_add(1), Ordering::SeqCst);
        drop(lists);
        if !free.head.is_null() {
            let n = unsafe { free.release_all() };
            if crate::PRINT_RCU {
                log::trace!("rcu: epoch {} released {}", e, n);
            }
        }
        true
    }
    /// 等待一个完整的宽限期, 之前回收的全部对象都会被析构
    ///
    /// 不能在读临界区内调用
    pub fn synchronize(&self) {
        let start = self.epoch.load(Ordering::SeqCst);
        let mut try_count = 0usize;
        while self.epoch.load(Ordering::SeqCst).wrapping_sub(start) < 2 {
            if !self.try_advance() {
                try_count += 1;
                if try_count == 0x10000000 {
                    panic!("rcu: synchronize stalled! try_count > {:#x}", try_count);
                }
                core::hint::spin_loop();
            }
        }
    }
    /// 等待释放的对象数量
    pub fn pending(&self) -> usize {
        let lists = self.lists.lock();
        lists.current.len + lists.pending.len
    }
}

impl Default for RcuManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RcuManager {
    fn drop(&mut self) {
        assert!(
            self.readers.iter().all(|r| r.load(Ordering::Relaxed) == 0),
            "rcu: manager dropped inside read section"
        );
        let lists = self.lists.get_mut();
        let current = lists.current.take();
        let pending = lists.pending.take();
        unsafe {
            current.release_all();
            pending.release_all();
        }
    }
}
