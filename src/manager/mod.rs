use core::ptr;

use alloc::{boxed::Box, string::String, sync::Arc};
use spin::MutexGuard;

use crate::{
    config::DcacheConfig,
    dentry::{DentryManager, DentryStat},
    error::{SysError, SysR},
    fssp::{Fs, SuperBlock},
    inode::{Inode, InodeKind},
    mount::{manager::MountManager, Mount},
};

use self::path::Path;

pub mod path;

/// 命名空间: 一棵由挂载点连接起来的目录树
///
/// 路径全部从命名空间的根或给定的 `Path` 开始解析, 分隔符为 '/'.
pub struct VfsManager {
    root: Path,
    mounts: MountManager,
    dcache: Arc<DentryManager>,
}

/// 同时持有两个目录锁, 按地址顺序加锁
fn lock_pair<'a>(a: &'a Inode, b: &'a Inode) -> (MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>) {
    if ptr::eq(a, b) {
        return (a.dir_lock(), None);
    }
    let (first, second) = if (a as *const Inode) < (b as *const Inode) {
        (a, b)
    } else {
        (b, a)
    };
    let g0 = first.dir_lock();
    let g1 = second.dir_lock();
    (g0, Some(g1))
}

/// 最后一个分量不能是 "." 或 ".."
fn check_last(name: &str, err: SysError) -> SysR<()> {
    match name {
        "." | ".." => Err(err),
        _ => Ok(()),
    }
}

impl VfsManager {
    pub fn new(config: DcacheConfig, root_fs: Box<dyn Fs>) -> SysR<Self> {
        let dcache = DentryManager::new(config);
        let sb = SuperBlock::new(root_fs);
        let root = dcache.create_root(&sb, sb.root_inode()?)?;
        let mounts = MountManager::new();
        let mount = Mount::new(mounts.alloc_id(), root.clone(), None);
        log::debug!("vfs: root {:?}", sb);
        Ok(Self {
            root: Path {
                mount,
                dentry: root,
            },
            mounts,
            dcache,
        })
    }
    pub fn dcache(&self) -> &Arc<DentryManager> {
        &self.dcache
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }
    pub fn stat(&self) -> DentryStat {
        self.dcache.stat()
    }
    /// 不存在时返回 ENOENT
    pub fn lookup(&self, path: &str) -> SysR<Path> {
        self.walk_all(None, path)
    }
    pub fn lookup_at(&self, base: &Path, path: &str) -> SysR<Path> {
        self.walk_all(Some(base), path)
    }
    pub fn create(&self, path: &str) -> SysR<Path> {
        self.create_impl(path, InodeKind::File)
    }
    pub fn mkdir(&self, path: &str) -> SysR<Path> {
        self.create_impl(path, InodeKind::Dir)
    }
    fn create_impl(&self, path: &str, kind: InodeKind) -> SysR<Path> {
        let (parent, name) = self.walk_path(None, path)?;
        check_last(name, SysError::EEXIST)?;
        let dir = Self::dir_inode(&parent.dentry)?;
        let key = self.child_key(&parent.dentry, name)?;
        let sb = parent.dentry.sb();
        let _lk = dir.dir_lock();
        let child = self.lookup_locked(&parent.dentry, &dir, &key)?;
        if !child.is_negative() {
            return Err(SysError::EEXIST);
        }
        let inode = sb.fs().create(sb, &dir, name.as_bytes(), kind)?;
        self.dcache.instantiate(&child, inode);
        if crate::PRINT_OP {
            log::trace!("vfs: create {} {:?}", path, kind);
        }
        Ok(Path {
            mount: parent.mount,
            dentry: child,
        })
    }
    /// 为已有文件增加一个名字
    pub fn link(&self, old: &str, new: &str) -> SysR<()> {
        let target = self.walk_all(None, old)?;
        let inode = target.inode().ok_or(SysError::ENOENT)?;
        if inode.is_dir() {
            return Err(SysError::EISDIR);
        }
        let (parent, name) = self.walk_path(None, new)?;
        check_last(name, SysError::EEXIST)?;
        if !Arc::ptr_eq(&target.mount, &parent.mount) {
            return Err(SysError::EXDEV);
        }
        let dir = Self::dir_inode(&parent.dentry)?;
        let key = self.child_key(&parent.dentry, name)?;
        let _lk = dir.dir_lock();
        let child = self.lookup_locked(&parent.dentry, &dir, &key)?;
        if !child.is_negative() {
            return Err(SysError::EEXIST);
        }
        dir.sb().fs().link(&dir, name.as_bytes(), &inode)?;
        self.dcache.instantiate(&child, inode);
        Ok(())
    }
    /// 只能unlink文件, 不能删除目录
    pub fn unlink(&self, path: &str) -> SysR<()> {
        let (parent, name) = self.walk_path(None, path)?;
        check_last(name, SysError::EISDIR)?;
        let dir = Self::dir_inode(&parent.dentry)?;
        let key = self.child_key(&parent.dentry, name)?;
        let _lk = dir.dir_lock();
        let child = self.lookup_locked(&parent.dentry, &dir, &key)?;
        let inode = child.inode().ok_or(SysError::ENOENT)?;
        if inode.is_dir() {
            return Err(SysError::EISDIR);
        }
        if child.is_mountpoint() {
            return Err(SysError::EBUSY);
        }
        dir.sb().fs().unlink(&dir, name.as_bytes(), &inode)?;
        drop(inode);
        self.dcache.delete(&child);
        Ok(())
    }
    pub fn rmdir(&self, path: &str) -> SysR<()> {
        let (parent, name) = self.walk_path(None, path)?;
        check_last(name, SysError::EINVAL)?;
        let dir = Self::dir_inode(&parent.dentry)?;
        let key = self.child_key(&parent.dentry, name)?;
        let _lk = dir.dir_lock();
        let child = self.lookup_locked(&parent.dentry, &dir, &key)?;
        let inode = child.inode().ok_or(SysError::ENOENT)?;
        if !inode.is_dir() {
            return Err(SysError::ENOTDIR);
        }
        if self.dcache.have_submounts(&child) {
            return Err(SysError::EBUSY);
        }
        dir.sb().fs().rmdir(&dir, name.as_bytes(), &inode)?;
        drop(inode);
        // 只剩下负目录项
        self.dcache.shrink_subtree(&child);
        self.dcache.delete(&child);
        Ok(())
    }
    /// 目标存在时被覆盖, 类型必须匹配
    pub fn rename(&self, old: &str, new: &str) -> SysR<()> {
        let (op, oname) = self.walk_path(None, old)?;
        let (np, nname) = self.walk_path(None, new)?;
        check_last(oname, SysError::EINVAL)?;
        check_last(nname, SysError::EINVAL)?;
        if !Arc::ptr_eq(&op.mount, &np.mount) {
            return Err(SysError::EXDEV);
        }
        let odir = Self::dir_inode(&op.dentry)?;
        let ndir = Self::dir_inode(&np.dentry)?;
        let okey = self.child_key(&op.dentry, oname)?;
        let nkey = self.child_key(&np.dentry, nname)?;
        let sb = op.dentry.sb();
        let _rename = (!Arc::ptr_eq(&odir, &ndir)).then(|| sb.rename_lock());
        let _locks = lock_pair(&odir, &ndir);
        let old_child = self.lookup_locked(&op.dentry, &odir, &okey)?;
        let old_inode = old_child.inode().ok_or(SysError::ENOENT)?;
        let new_child = self.lookup_locked(&np.dentry, &ndir, &nkey)?;
        if old_child.ptr_eq(&new_child) {
            return Ok(());
        }
        if old_child.is_mountpoint() || new_child.is_mountpoint() {
            return Err(SysError::EBUSY);
        }
        if old_inode.is_dir() && self.dcache.is_subdir(&np.dentry, &old_child) {
            return Err(SysError::EINVAL);
        }
        if let Some(victim) = new_child.inode() {
            if Arc::ptr_eq(&victim, &old_inode) {
                // 同一个文件的两个名字
                return Ok(());
            }
            match (old_inode.is_dir(), victim.is_dir()) {
                (false, true) => return Err(SysError::EISDIR),
                (true, false) => return Err(SysError::ENOTDIR),
                _ => (),
            }
        }
        sb.fs()
            .rename(&odir, oname.as_bytes(), &ndir, nname.as_bytes())?;
        self.dcache.rename(&old_child, &np.dentry, &nkey, Some(&new_child))?;
        if crate::PRINT_OP {
            log::trace!("vfs: rename {} -> {}", old, new);
        }
        Ok(())
    }
    /// 在目录 path 上挂载新的文件系统
    pub fn mount(&self, path: &str, fs: Box<dyn Fs>) -> SysR<()> {
        let target = self.walk_all(None, path)?;
        Self::dir_inode(&target.dentry)?;
        if !target.dentry.is_hashed() && !target.dentry.is_root() {
            return Err(SysError::ENOENT);
        }
        let sb = SuperBlock::new(fs);
        let root = self.dcache.create_root(&sb, sb.root_inode()?)?;
        let mount = Mount::new(
            self.mounts.alloc_id(),
            root,
            Some((target.mount, target.dentry)),
        );
        log::debug!("vfs: mount {:?} at {} as {}", sb, path, mount.id());
        self.mounts.insert(mount)
    }
    /// 挂载点中仍然有被使用的目录项或子挂载点时返回 EBUSY
    pub fn umount(&self, path: &str) -> SysR<()> {
        let p = self.walk_all(None, path)?;
        if !p.is_mount_root() {
            return Err(SysError::EINVAL);
        }
        if p.mount.parent().is_none() {
            return Err(SysError::EBUSY);
        }
        let m = p.mount.clone();
        drop(p);
        let removed = self.mounts.remove_with(&m, || {
            // 挂载表和 m
            if Arc::strong_count(&m) > 2 {
                return Err(SysError::EBUSY);
            }
            self.dcache.shrink_sb(m.sb());
            let root = m.root();
            if root.count() > 1 || self.dcache.has_children(root) {
                return Err(SysError::EBUSY);
            }
            Ok(())
        })?;
        log::debug!("vfs: umount {} ({})", path, m.id());
        drop(removed);
        drop(m);
        Ok(())
    }
    /// 通过inode号打开 base 所在文件系统中的文件, 不经过路径
    pub fn open_by_handle(&self, base: &Path, ino: u64) -> SysR<Path> {
        let sb = base.mount.sb();
        let inode = sb.fs().get_inode(sb, ino)?;
        let dentry = self.dcache.create_anon(inode)?;
        Ok(Path {
            mount: base.mount.clone(),
            dentry,
        })
    }
    /// 相对于命名空间根的路径
    pub fn path_of(&self, path: &Path) -> SysR<String> {
        self.dcache.path_string(
            &path.dentry,
            &path.mount,
            &self.root.dentry,
            &self.root.mount,
        )
    }
}

impl Drop for VfsManager {
    fn drop(&mut self) {
        // 后挂载的先释放
        let mounts = self.mounts.drain();
        log::debug!("vfs: teardown {} mounts", mounts.len());
        drop(mounts);
    }
}
