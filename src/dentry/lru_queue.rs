use core::ptr::NonNull;

use crate::list::{InListIter, InListNode};

use super::{DentryCache, DentryLruNode};

type LRUNode = InListNode<DentryCache, DentryLruNode>;

/// 未使用目录项队列, 头部最旧
///
/// 只在结构锁内访问. 加入队列是惰性的: 重新获得引用的目录项会留在队列中,
/// 直到扫描时被移出.
pub(crate) struct LRUQueue {
    head: LRUNode,
    len: usize,
}

impl LRUQueue {
    pub const fn new() -> Self {
        Self {
            head: InListNode::new(),
            len: 0,
        }
    }
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }
    #[inline(always)]
    pub fn contains(d: &DentryCache) -> bool {
        !d.lru_node.is_empty()
    }
    pub fn push_newest(&mut self, d: &DentryCache) {
        self.head.push_prev(&d.lru_node);
        self.len += 1;
    }
    pub fn push_oldest(&mut self, d: &DentryCache) {
        self.head.push_next(&d.lru_node);
        self.len += 1;
    }
    pub fn remove(&mut self, d: &DentryCache) -> bool {
        if !Self::contains(d) {
            return false;
        }
        d.lru_node.pop_self();
        self.len -= 1;
        true
    }
    pub fn pop_oldest(&mut self) -> Option<NonNull<DentryCache>> {
        let p = self.head.first()?;
        unsafe { p.as_ref().lru_node.pop_self() };
        self.len -= 1;
        Some(p)
    }
    /// 把满足条件的目录项移动到最旧的一端, 每个目录项最多检查一次
    pub fn move_to_oldest(&mut self, mut pred: impl FnMut(&DentryCache) -> bool) -> usize {
        let mut found = 0;
        let mut n = self.len;
        let mut cur = self.head.first();
        while let Some(p) = cur {
            if n == 0 {
                break;
            }
            n -= 1;
            let d = unsafe { p.as_ref() };
            cur = d.lru_node.next_in(&self.head);
            if pred(d) {
                d.lru_node.pop_self();
                self.head.push_next(&d.lru_node);
                found += 1;
            }
        }
        found
    }
    /// # Safety
    ///
    /// 遍历期间只允许移动刚刚返回的目录项
    pub unsafe fn iter(&self) -> InListIter<'_, DentryCache, DentryLruNode> {
        self.head.iter()
    }
    #[cfg(test)]
    pub fn check(&self) {
        self.head.list_check();
        assert_eq!(unsafe { self.iter().count() }, self.len);
    }
}
