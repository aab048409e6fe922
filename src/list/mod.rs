//! 侵入式链表
//!
//! 节点只记录链接关系, 不持有所有权. 链表的全部修改操作都必须在保护这条链表的
//! 外部锁内进行, 例如目录项的LRU/子目录/别名链表都由结构锁保护.
//!
//! 节点可以不初始化直接使用: 空指针和指向自身都视为空节点.

use core::{
    cell::Cell,
    marker::{PhantomData, PhantomPinned},
    ptr::{self, NonNull},
};

/// 通过成员节点减去偏移量访问宿主结构
///
/// T: 宿主类型
pub trait ListAccess<T> {
    fn offset() -> usize;
    /// # Safety
    ///
    /// node 必须是某个 T 中由 offset 指定的成员
    #[inline(always)]
    unsafe fn get(node: NonNull<ListNode>) -> NonNull<T> {
        NonNull::new_unchecked(node.as_ptr().cast::<u8>().sub(Self::offset()).cast())
    }
}

/// 生成一个通过成员反向获取宿主的类型
macro_rules! inlist_access {
    ($vis: vis $name: ident, $T: ty, $field: ident) => {
        $vis struct $name {}
        impl $crate::list::ListAccess<$T> for $name {
            #[inline(always)]
            fn offset() -> usize {
                core::mem::offset_of!($T, $field)
            }
        }
    };
}

/// 双向循环链表节点
#[repr(C)]
pub struct ListNode {
    prev: Cell<*const ListNode>,
    next: Cell<*const ListNode>,
    _marker: PhantomPinned,
}

// 由外部锁串行化
unsafe impl Send for ListNode {}
unsafe impl Sync for ListNode {}

impl ListNode {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            prev: Cell::new(ptr::null()),
            next: Cell::new(ptr::null()),
            _marker: PhantomPinned,
        }
    }
    #[inline(always)]
    pub fn init(&self) {
        self.prev.set(self);
        self.next.set(self);
    }
    #[inline(always)]
    pub fn lazy_init(&self) {
        if self.prev.get().is_null() {
            debug_assert!(self.next.get().is_null());
            self.init();
        }
    }
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        let prev = self.prev.get();
        if prev.is_null() || ptr::eq(prev, self) {
            debug_assert!(self.next.get().is_null() || ptr::eq(self.next.get(), self));
            true
        } else {
            false
        }
    }
    pub fn list_check(&self) {
        if cfg!(debug_assertions) && !self.is_empty() {
            unsafe {
                let head = self as *const Self;
                let mut cur = head;
                loop {
                    let nxt = (*cur).next.get();
                    assert!(ptr::eq((*nxt).prev.get(), cur));
                    cur = nxt;
                    if ptr::eq(cur, head) {
                        break;
                    }
                }
            }
        }
    }
    /// 将 new 插入到 self 之前
    #[inline(always)]
    pub fn push_prev(&self, new: &Self) {
        debug_assert!(!ptr::eq(self, new));
        debug_assert!(new.is_empty());
        self.lazy_init();
        let prev = self.prev.get();
        new.prev.set(prev);
        new.next.set(self);
        unsafe { (*prev).next.set(new) };
        self.prev.set(new);
    }
    /// 将 new 插入到 self 之后
    #[inline(always)]
    pub fn push_next(&self, new: &Self) {
        debug_assert!(!ptr::eq(self, new));
        debug_assert!(new.is_empty());
        self.lazy_init();
        let next = self.next.get();
        new.prev.set(self);
        new.next.set(next);
        unsafe { (*next).prev.set(new) };
        self.next.set(new);
    }
    #[inline(always)]
    pub fn pop_self(&self) {
        if self.is_empty() {
            return;
        }
        let prev = self.prev.get();
        let next = self.next.get();
        unsafe {
            debug_assert!(ptr::eq((*prev).next.get(), self));
            debug_assert!(ptr::eq((*next).prev.get(), self));
            (*prev).next.set(next);
            (*next).prev.set(prev);
        }
        self.init();
    }
    #[inline(always)]
    pub fn try_next(&self) -> Option<NonNull<Self>> {
        if self.is_empty() {
            return None;
        }
        NonNull::new(self.next.get() as *mut Self)
    }
    #[inline(always)]
    pub fn try_prev(&self) -> Option<NonNull<Self>> {
        if self.is_empty() {
            return None;
        }
        NonNull::new(self.prev.get() as *mut Self)
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

/// 带宿主类型的侵入式链表节点
///
/// 同一个类型既可以作为链表头也可以作为成员
#[repr(transparent)]
pub struct InListNode<T, A: ListAccess<T>> {
    node: ListNode,
    _marker: PhantomData<fn() -> (*const T, A)>,
}

impl<T, A: ListAccess<T>> InListNode<T, A> {
    pub const fn new() -> Self {
        Self {
            node: ListNode::new(),
            _marker: PhantomData,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }
    pub fn list_check(&self) {
        self.node.list_check()
    }
    pub fn push_prev(&self, new: &Self) {
        self.node.push_prev(&new.node)
    }
    pub fn push_next(&self, new: &Self) {
        self.node.push_next(&new.node)
    }
    pub fn pop_self(&self) {
        self.node.pop_self()
    }
    /// 作为链表头时的第一个成员
    pub fn first(&self) -> Option<NonNull<T>> {
        self.node.try_next().map(|p| unsafe { A::get(p) })
    }
    /// 作为链表头时的最后一个成员
    pub fn last(&self) -> Option<NonNull<T>> {
        self.node.try_prev().map(|p| unsafe { A::get(p) })
    }
    /// 成员在 head 链表中的后继, 到达链表头时返回None
    pub fn next_in(&self, head: &Self) -> Option<NonNull<T>> {
        let next = self.node.try_next()?;
        if ptr::eq(next.as_ptr(), &head.node) {
            return None;
        }
        Some(unsafe { A::get(next) })
    }
    /// 遍历链表, 迭代器会提前读取后继, 因此允许移除刚刚返回的成员
    ///
    /// # Safety
    ///
    /// 调用者持有链表锁, 且遍历期间不移除尚未返回的成员
    pub unsafe fn iter(&self) -> InListIter<'_, T, A> {
        InListIter {
            head: self,
            cur: self.first(),
        }
    }
}

impl<T, A: ListAccess<T>> Default for InListNode<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InListIter<'a, T, A: ListAccess<T>> {
    head: &'a InListNode<T, A>,
    cur: Option<NonNull<T>>,
}

impl<'a, T, A: ListAccess<T>> Iterator for InListIter<'a, T, A> {
    type Item = NonNull<T>;
    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        let node = unsafe {
            &*cur
                .as_ptr()
                .cast::<u8>()
                .add(A::offset())
                .cast::<InListNode<T, A>>()
        };
        self.cur = node.next_in(self.head);
        Some(cur)
    }
}
