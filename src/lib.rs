//!
//! 目录项缓存: 无锁查找, 惰性LRU回收与原子重命名
//!
//! 目录项由RCU延迟释放, 文件系统通过 `Fs` 接口接入.
//!
#![cfg_attr(not(test), no_std)]

const PRINT_OP: bool = false;
const PRINT_INTO_LRU: bool = false;
const PRINT_MOVE: bool = false;
const PRINT_RCU: bool = false;

extern crate alloc;
#[macro_use]
extern crate bitflags;

#[macro_use]
mod list;

pub mod config;
pub mod dentry;
pub mod error;
pub mod fssp;
pub mod hash_name;
pub mod inode;
pub mod manager;
pub mod memfs;
pub mod mount;
pub mod rcu;
pub mod sync;
#[cfg(test)]
mod test;

pub use {
    config::DcacheConfig,
    dentry::{
        rename::MoveGuard, Dentry, DentryCache, DentryFlags, DentryManager, DentryStat,
    },
    error::{SysError, SysR},
    fssp::{DeletePolicy, Fs, SuperBlock},
    hash_name::{NameHash, NameKey},
    inode::{Inode, InodeKind},
    manager::{path::Path, VfsManager},
    memfs::MemFs,
    mount::Mount,
};
