use core::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use alloc::{boxed::Box, vec::Vec};

use crate::hash_name::{hash_all, NameHash};

use super::{DentryCache, BUCKET_NONE};

/// dentry cache 哈希索引器
///
/// 每个桶是一条单向链表, 读者在RCU临界区内无锁遍历, 修改必须持有结构锁.
/// 插入在链表头进行, 移除只修改前驱的后继指针.
pub(crate) struct DentryIndex {
    table: Box<[AtomicPtr<DentryCache>]>,
    mask: usize,
}

impl DentryIndex {
    pub fn new(buckets: usize) -> Self {
        debug_assert!(buckets.is_power_of_two());
        let table: Vec<AtomicPtr<DentryCache>> = (0..buckets)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            table: table.into_boxed_slice(),
            mask: buckets - 1,
        }
    }
    #[inline(always)]
    pub fn bucket_of(&self, parent: *const DentryCache, nh: NameHash) -> usize {
        hash_all(parent as usize, nh).0 as usize & self.mask
    }
    #[inline(always)]
    pub fn head(&self, bucket: usize) -> *mut DentryCache {
        self.table[bucket].load(Ordering::Acquire)
    }
    /// 遍历一个桶
    ///
    /// # Safety
    ///
    /// 持有结构锁或处于RCU读临界区
    pub unsafe fn iter(&self, bucket: usize) -> impl Iterator<Item = &DentryCache> + '_ {
        let mut cur = self.head(bucket);
        core::iter::from_fn(move || {
            #[allow(unused_unsafe)]
            let d = unsafe { cur.as_ref()? };
            cur = d.hash_next.load(Ordering::Acquire);
            Some(d)
        })
    }
    /// 插入链表头
    ///
    /// # Safety
    ///
    /// 持有结构锁和 d 的节点锁, d 不在任何哈希链中
    pub unsafe fn link(&self, d: &DentryCache, bucket: usize) {
        debug_assert_eq!(d.bucket.load(Ordering::Relaxed), BUCKET_NONE);
        let slot = &self.table[bucket];
        d.hash_next.store(slot.load(Ordering::Relaxed), Ordering::Relaxed);
        d.bucket.store(bucket, Ordering::Relaxed);
        slot.store(d.ptr(), Ordering::Release);
    }
    /// 从所在的哈希链中移除, d 保留后继指针
    ///
    /// # Safety
    ///
    /// 持有结构锁和 d 的节点锁, d 位于 bucket 记录的哈希链中
    pub unsafe fn unlink(&self, d: &DentryCache) {
        let bucket = d.bucket.load(Ordering::Relaxed);
        let next = d.hash_next.load(Ordering::Relaxed);
        let slot = &self.table[bucket];
        let head = slot.load(Ordering::Relaxed);
        if ptr::eq(head, d) {
            slot.store(next, Ordering::Release);
        } else {
            let prev = self
                .iter(bucket)
                .find(|x| ptr::eq(x.hash_next.load(Ordering::Relaxed), d));
            match prev {
                Some(prev) => prev.hash_next.store(next, Ordering::Release),
                None => panic!("dcache: dentry {:#x} missing from bucket {}", d.id(), bucket),
            }
        }
        d.bucket.store(BUCKET_NONE, Ordering::Relaxed);
    }
}
