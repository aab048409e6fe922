use alloc::sync::Arc;

use crate::{
    dentry::Dentry,
    error::{SysError, SysR},
    hash_name::NameKey,
    inode::Inode,
    mount::{manager::MountManager, Mount},
    VfsManager,
};

pub const NAME_MAX: usize = 255;

/// 挂载点加目录项, 唯一确定命名空间中的一个位置
#[derive(Clone, Debug)]
pub struct Path {
    pub mount: Arc<Mount>,
    pub dentry: Dentry,
}

impl Path {
    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.dentry.inode()
    }
    pub(crate) fn is_mount_root(&self) -> bool {
        self.dentry.ptr_eq(self.mount.root())
    }
    fn run_mount_prev(&mut self) {
        loop {
            // 如果当前目录就是挂载点的根目录就回退一级
            if !self.is_mount_root() {
                return;
            }
            let (parent, locate) = match (self.mount.parent(), self.mount.mountpoint()) {
                (Some(p), Some(d)) => (p.clone(), d.clone()),
                _ => return, // 命名空间的根
            };
            self.mount = parent;
            self.dentry = locate;
        }
    }
    fn run_mount_next(&mut self, mounts: &MountManager) {
        while self.dentry.is_mountpoint() {
            let mount = match mounts.lookup(&self.mount, &self.dentry) {
                None => return,
                Some(mount) => mount,
            };
            self.dentry = mount.root().clone();
            self.mount = mount;
        }
    }
    pub fn parent(&self) -> Path {
        let mut path = self.clone();
        path.run_mount_prev();
        path.dentry = path.dentry.parent();
        path
    }
}

impl VfsManager {
    /// 返回到达最后一个文件名的路径和文件名
    ///
    /// 绝对路径或 base 为 None 时从命名空间的根开始
    pub(crate) fn walk_path<'a>(
        &self,
        base: Option<&Path>,
        path_str: &'a str,
    ) -> SysR<(Path, &'a str)> {
        let mut path = match base {
            Some(base) if !is_absolute_path(path_str) => base.clone(),
            _ => self.root.clone(),
        };
        let (path_str, name) = match path_str.rsplit_once('/') {
            Some((path, name)) => (path, name),
            None => ("", path_str),
        };
        for s in path_str.split('/') {
            path = self.walk_name(path, s)?;
        }
        path.run_mount_next(&self.mounts);
        Ok((path, name))
    }
    pub(crate) fn walk_name(&self, mut path: Path, name: &str) -> SysR<Path> {
        path.run_mount_next(&self.mounts);
        match name {
            "" | "." => (),
            ".." => {
                path.run_mount_prev();
                path.dentry = path.dentry.parent();
            }
            s => path.dentry = self.search_child(&path.dentry, s)?,
        }
        Ok(path)
    }
    pub(crate) fn walk_all(&self, base: Option<&Path>, path_str: &str) -> SysR<Path> {
        let (path, name) = self.walk_path(base, path_str)?;
        let mut path = self.walk_name(path, name)?;
        path.run_mount_next(&self.mounts);
        Ok(path)
    }
    /// 目录中的正目录项
    fn search_child(&self, dir: &Dentry, s: &str) -> SysR<Dentry> {
        let key = self.child_key(dir, s)?;
        let child = match self.dcache.lookup(dir, &key) {
            Some(child) => child,
            None => {
                let inode = Self::dir_inode(dir)?;
                let _lk = inode.dir_lock();
                self.lookup_locked(dir, &inode, &key)?
            }
        };
        if child.is_negative() {
            return Err(SysError::ENOENT);
        }
        Ok(child)
    }
    pub(crate) fn child_key(&self, dir: &Dentry, s: &str) -> SysR<NameKey> {
        if s.is_empty() || name_invalid(s) {
            return Err(SysError::EINVAL);
        }
        if s.len() > NAME_MAX {
            return Err(SysError::ENAMETOOLONG);
        }
        Ok(dir.name_key(s.as_bytes()))
    }
    pub(crate) fn dir_inode(dir: &Dentry) -> SysR<Arc<Inode>> {
        let inode = dir.inode().ok_or(SysError::ENOENT)?;
        if !inode.is_dir() {
            return Err(SysError::ENOTDIR);
        }
        Ok(inode)
    }
    /// 缓存未命中时询问文件系统, 调用者持有目录锁
    ///
    /// 文件系统中不存在时返回加入哈希表的负目录项
    pub(crate) fn lookup_locked(&self, dir: &Dentry, inode: &Inode, key: &NameKey) -> SysR<Dentry> {
        if let Some(d) = self.dcache.lookup(dir, key) {
            return Ok(d);
        }
        let child = self.dcache.create(dir, key)?;
        let sb = dir.sb();
        let found = sb.fs().lookup(sb, inode, key.name())?;
        Ok(match self.dcache.splice_alias(found, &child) {
            Some(alias) => alias,
            None => child,
        })
    }
}

pub fn name_invalid(s: &str) -> bool {
    s.bytes().any(|c| matches!(c, b'/' | b'\0'))
}

pub fn is_absolute_path(s: &str) -> bool {
    matches!(s.as_bytes().first(), Some(b'/'))
}
