use core::{
    fmt,
    hash::{BuildHasher, BuildHasherDefault, Hasher},
    ptr::NonNull,
};

use alloc::boxed::Box;

use crate::rcu::{RcuCollect, RcuHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameHash(pub u64);

/// 包含父目录身份的哈希值, 用于选择哈希桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllHash(pub u64);

#[derive(Default)]
pub struct NameHasher(u64);

impl Hasher for NameHasher {
    fn write(&mut self, bytes: &[u8]) {
        const MUL: u64 = 130923501241292381;
        const ADD: u64 = 423823493280965269;
        self.0 = bytes
            .iter()
            .copied()
            .fold(self.0, |x, a| (x ^ a as u64).wrapping_mul(MUL).wrapping_add(ADD));
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

/// 默认的名字哈希
pub fn hash_name(name: &[u8]) -> NameHash {
    NameHash(BuildHasherDefault::<NameHasher>::default().hash_one(name))
}

pub fn hash_all_by_nh(base: u64, nh: NameHash) -> AllHash {
    AllHash(base.rotate_left(32).wrapping_add(nh.0))
}

/// parent 为父目录地址
pub fn hash_all(parent: usize, nh: NameHash) -> AllHash {
    let mut x = hash_all_by_nh(parent as u64, nh).0;
    // 地址低位总是相同的, 混合后再取桶
    x ^= x >> 29;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 32;
    AllHash(x)
}

/// 名字字节与缓存的哈希值, 创建后不可修改
#[derive(Clone, PartialEq, Eq)]
pub struct NameKey {
    name: Box<[u8]>,
    hash: NameHash,
}

impl NameKey {
    pub fn new(name: &[u8]) -> Self {
        Self::with_hash(name, hash_name(name))
    }
    /// 使用文件系统提供的哈希值
    pub fn with_hash(name: &[u8], hash: NameHash) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
    #[inline(always)]
    pub fn name(&self) -> &[u8] {
        &self.name
    }
    #[inline(always)]
    pub fn hash(&self) -> NameHash {
        self.hash
    }
    pub fn len(&self) -> usize {
        self.name.len()
    }
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Debug for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.name) {
            Ok(s) => write!(f, "{:?}#{:x}", s, self.hash.0),
            Err(_) => write!(f, "{:?}#{:x}", &*self.name, self.hash.0),
        }
    }
}

/// 目录项持有的名字
///
/// 如果要修改名字, 必须整体替换指针并使用RCU释放旧值, 保证无锁读取的正确性
#[repr(C)]
pub(crate) struct HashName {
    rcu: RcuHead,
    key: NameKey,
}

#[cfg(test)]
static_assertions::const_assert_eq!(core::mem::offset_of!(HashName, rcu), 0);

unsafe impl RcuCollect for HashName {
    fn rcu_head(&self) -> &RcuHead {
        &self.rcu
    }
}

impl HashName {
    pub fn alloc(key: NameKey) -> NonNull<Self> {
        NonNull::from(Box::leak(Box::new(Self {
            rcu: RcuHead::new(),
            key,
        })))
    }
    /// # Safety
    ///
    /// p 由 alloc 生成且没有任何读者
    pub unsafe fn free(p: NonNull<Self>) {
        drop(Box::from_raw(p.as_ptr()))
    }
    #[inline(always)]
    pub fn key(&self) -> &NameKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash_order_sensitive() {
        assert_ne!(hash_name(b"ab"), hash_name(b"ba"));
        assert_eq!(hash_name(b"abc"), NameKey::new(b"abc").hash());
        let a = hash_all(0x1000, hash_name(b"x"));
        let b = hash_all(0x2000, hash_name(b"x"));
        assert_ne!(a, b);
    }
}
