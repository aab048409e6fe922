//! 挂载点所有权被挂载管理器持有
//!
//! 每个挂载点持有父挂载点和挂载位置目录项的引用, 用来保证路径的回退
//!

pub mod manager;

use core::fmt;

use alloc::sync::Arc;

use crate::{dentry::Dentry, fssp::SuperBlock};

pub struct Mount {
    id: usize,
    /// 挂载的文件系统根目录
    root: Dentry,
    /// 父挂载点和此挂载点所在的目录项, 命名空间的根为None
    parent: Option<Arc<Mount>>,
    locate: Option<Dentry>,
}

impl Mount {
    pub(crate) fn new(id: usize, root: Dentry, parent: Option<(Arc<Mount>, Dentry)>) -> Arc<Self> {
        let (parent, locate) = match parent {
            Some((m, d)) => {
                d.mount_inc();
                (Some(m), Some(d))
            }
            None => (None, None),
        };
        Arc::new(Self {
            id,
            root,
            parent,
            locate,
        })
    }
    #[inline(always)]
    pub fn id(&self) -> usize {
        self.id
    }
    pub fn sb(&self) -> &Arc<SuperBlock> {
        self.root.sb()
    }
    #[inline(always)]
    pub fn root(&self) -> &Dentry {
        &self.root
    }
    #[inline(always)]
    pub fn parent(&self) -> Option<&Arc<Mount>> {
        self.parent.as_ref()
    }
    /// 挂载位置
    #[inline(always)]
    pub fn mountpoint(&self) -> Option<&Dentry> {
        self.locate.as_ref()
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Some(d) = self.locate.as_ref() {
            d.mount_dec();
        }
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("sb", self.sb())
            .field("parent", &self.parent.as_ref().map(|m| m.id))
            .finish()
    }
}
