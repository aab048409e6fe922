use core::ptr;

use alloc::{string::String, sync::Arc, vec};

use crate::{
    error::{SysError, SysR},
    mount::Mount,
};

use super::{manager::DentryManager, Dentry, DentryCache};

pub const PATH_MAX: usize = 4096;
pub const DELETED_SUFFIX: &[u8] = b" (deleted)";

/// 从 end 开始向前写入, 返回新的起始位置
fn prepend(buf: &mut [u8], end: usize, s: &[u8]) -> SysR<usize> {
    if s.len() > end {
        return Err(SysError::ENAMETOOLONG);
    }
    let start = end - s.len();
    buf[start..end].copy_from_slice(s);
    Ok(start)
}

/// 沿父目录和挂载点向上走到 (root, root_mnt) 或顶层, f 返回true时停止
fn walk_up<'a>(
    mut d: &'a DentryCache,
    mut m: &'a Mount,
    root: &DentryCache,
    root_mnt: &Mount,
    mut f: impl FnMut(&'a DentryCache) -> SysR<bool>,
) -> SysR<()> {
    loop {
        if ptr::eq(d, root) && ptr::eq(m, root_mnt) {
            return Ok(());
        }
        if ptr::eq(d, &**m.root()) {
            match (m.parent(), m.mountpoint()) {
                (Some(pm), Some(mp)) => {
                    d = &**mp;
                    m = &**pm;
                    continue;
                }
                _ => return Ok(()),
            }
        }
        if d.is_root() {
            return Ok(());
        }
        if f(d)? {
            return Ok(());
        }
        d = unsafe { &*d.parent_ptr() };
    }
}

fn prepend_path(
    entry: &DentryCache,
    mnt: &Mount,
    root: &DentryCache,
    root_mnt: &Mount,
    buf: &mut [u8],
) -> SysR<usize> {
    let mut deleted = false;
    walk_up(entry, mnt, root, root_mnt, |d| {
        deleted = !d.is_hashed();
        Ok(deleted)
    })?;
    let mut end = buf.len();
    if deleted {
        end = prepend(buf, end, DELETED_SUFFIX)?;
    }
    let tail = end;
    walk_up(entry, mnt, root, root_mnt, |d| {
        let name = unsafe { d.name_ref() };
        end = prepend(buf, end, name.name())?;
        end = prepend(buf, end, b"/")?;
        Ok(false)
    })?;
    if end == tail {
        end = prepend(buf, end, b"/")?;
    }
    Ok(end)
}

impl DentryManager {
    /// 生成 entry 相对于 (root, root_mnt) 的路径, 结果位于 buf 的末尾
    ///
    /// 穿过挂载点时回到父挂载的挂载点目录项. 路径上存在已经被移出哈希表的
    /// 目录项时追加 " (deleted)". 缓冲区不足时返回 ENAMETOOLONG.
    pub fn resolve_path<'b>(
        &self,
        entry: &Dentry,
        mnt: &Arc<Mount>,
        root: &Dentry,
        root_mnt: &Arc<Mount>,
        buf: &'b mut [u8],
    ) -> SysR<&'b [u8]> {
        let start = self.rename_seq.read(|| {
            let _rcu = self.rcu().read_lock();
            prepend_path(entry, mnt, root, root_mnt, buf)
        })?;
        Ok(&buf[start..])
    }
    pub fn path_string(
        &self,
        entry: &Dentry,
        mnt: &Arc<Mount>,
        root: &Dentry,
        root_mnt: &Arc<Mount>,
    ) -> SysR<String> {
        let mut buf = vec![0u8; PATH_MAX];
        let path = self.resolve_path(entry, mnt, root, root_mnt, &mut buf)?;
        Ok(String::from_utf8_lossy(path).into_owned())
    }
}
