//! 基于epoch的延迟回收
//!
//! 读者进入临界区时登记在当前epoch对应的计数上, 被移除的对象通过 `RcuHead`
//! 挂入释放链表, 当可能看见它的读者全部离开后才会真正析构.
//!
//! 释放链表是侵入式的, 回收过程不分配内存.

use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

use alloc::boxed::Box;

pub mod manager;

pub use manager::RcuManager;

/// 侵入式回收节点
///
/// 必须是 `#[repr(C)]` 结构的首个字段, 回收时直接把节点地址当作宿主地址
#[repr(C)]
pub struct RcuHead {
    next: Cell<*mut RcuHead>,
    release: Cell<Option<unsafe fn(*mut RcuHead)>>,
}

// 只在管理器的锁内修改
unsafe impl Send for RcuHead {}
unsafe impl Sync for RcuHead {}

impl RcuHead {
    pub const fn new() -> Self {
        Self {
            next: Cell::new(core::ptr::null_mut()),
            release: Cell::new(None),
        }
    }
    fn is_queued(&self) -> bool {
        self.release.get().is_some()
    }
}

impl Default for RcuHead {
    fn default() -> Self {
        Self::new()
    }
}

/// 可以被延迟回收的类型
///
/// # Safety
///
/// 实现者必须是 `#[repr(C)]` 且首个字段为 `RcuHead`, 对象由 `Box` 分配
pub unsafe trait RcuCollect: Sized + Send + 'static {
    fn rcu_head(&self) -> &RcuHead;
}

/// 把 `RcuHead` 还原为 `Box<T>` 并析构
unsafe fn rcu_release_fn<T: RcuCollect>(head: *mut RcuHead) {
    drop(Box::from_raw(head.cast::<T>()))
}

/// 读临界区
///
/// 持有期间任何在进入之后被回收的对象都不会被析构. 不能跨线程传递.
pub struct RcuReadGuard<'a> {
    manager: &'a RcuManager,
    idx: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RcuReadGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.manager.read_unlock(self.idx);
    }
}

/// 侵入式单链表, 只在管理器锁内访问
struct RetireList {
    head: *mut RcuHead,
    len: usize,
}

impl RetireList {
    const fn new() -> Self {
        Self {
            head: core::ptr::null_mut(),
            len: 0,
        }
    }
    fn push(&mut self, head: NonNull<RcuHead>) {
        unsafe { head.as_ref().next.set(self.head) };
        self.head = head.as_ptr();
        self.len += 1;
    }
    fn take(&mut self) -> Self {
        core::mem::replace(self, Self::new())
    }
    /// 析构链表中的全部对象
    ///
    /// # Safety
    ///
    /// 没有读者能够再看到这些对象
    unsafe fn release_all(self) -> usize {
        let mut cur = self.head;
        let mut n = 0;
        while !cur.is_null() {
            let next = (*cur).next.get();
            let release = (*cur).release.get();
            debug_assert!(release.is_some());
            if let Some(f) = release {
                f(cur);
            }
            cur = next;
            n += 1;
        }
        debug_assert_eq!(n, self.len);
        n
    }
}

// 链表节点只在锁内访问
unsafe impl Send for RetireList {}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[repr(C)]
    struct Obj {
        rcu: RcuHead,
        dropped: Arc<AtomicUsize>,
    }
    unsafe impl RcuCollect for Obj {
        fn rcu_head(&self) -> &RcuHead {
            &self.rcu
        }
    }
    impl Drop for Obj {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn retire(mgr: &RcuManager, dropped: &Arc<AtomicUsize>) {
        let obj = Box::new(Obj {
            rcu: RcuHead::new(),
            dropped: dropped.clone(),
        });
        unsafe { mgr.rcu_drop(NonNull::from(Box::leak(obj))) };
    }

    #[test]
    fn reader_delays_release() {
        let mgr = RcuManager::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        let guard = mgr.read_lock();
        retire(&mgr, &dropped);
        for _ in 0..8 {
            mgr.try_advance();
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        drop(guard);
        mgr.synchronize();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_reader_does_not_block() {
        let mgr = RcuManager::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        retire(&mgr, &dropped);
        retire(&mgr, &dropped);
        let _guard = mgr.read_lock();
        mgr.try_advance();
        mgr.try_advance();
        // 当前读者在回收之后进入, 不会看到已移除的对象
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_manager_releases_all() {
        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let mgr = RcuManager::new();
            let g = mgr.read_lock();
            retire(&mgr, &dropped);
            drop(g);
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
