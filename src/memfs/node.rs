use alloc::{collections::BTreeMap, vec::Vec};

use crate::{
    error::{SysError, SysR},
    inode::InodeKind,
};

pub(super) struct MemNode {
    pub kind: InodeKind,
    /// 目录中指向此节点的名字数
    pub nlink: usize,
    subs: BTreeMap<Vec<u8>, u64>,
}

impl MemNode {
    pub fn new(kind: InodeKind) -> Self {
        Self {
            kind,
            nlink: 1,
            subs: BTreeMap::new(),
        }
    }
    fn dir_check(&self) -> SysR<()> {
        match self.kind {
            InodeKind::Dir => Ok(()),
            InodeKind::File => Err(SysError::ENOTDIR),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
    pub fn search(&self, name: &[u8]) -> SysR<Option<u64>> {
        self.dir_check()?;
        Ok(self.subs.get(name).copied())
    }
    pub fn insert(&mut self, name: Vec<u8>, ino: u64) -> SysR<()> {
        self.dir_check()?;
        if self.subs.contains_key(&name) {
            return Err(SysError::EEXIST);
        }
        self.subs.insert(name, ino);
        Ok(())
    }
    pub fn remove(&mut self, name: &[u8]) -> SysR<u64> {
        self.dir_check()?;
        self.subs.remove(name).ok_or(SysError::ENOENT)
    }
}
