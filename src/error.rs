use core::fmt;

/// 错误码, 取值与Linux errno一致
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(isize)]
pub enum SysError {
    ENOENT = 2,
    ENOMEM = 12,
    EBUSY = 16,
    EEXIST = 17,
    EXDEV = 18,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    ENAMETOOLONG = 36,
    ENOTEMPTY = 39,
    EOPNOTSUPP = 95,
}

pub type SysR<T> = Result<T, SysError>;

impl SysError {
    #[inline(always)]
    pub const fn errno(self) -> isize {
        self as isize
    }
    /// 系统调用返回值形式
    #[inline(always)]
    pub const fn neg(self) -> isize {
        -(self as isize)
    }
    pub const fn from_errno(errno: isize) -> Option<Self> {
        use SysError::*;
        Some(match errno {
            2 => ENOENT,
            12 => ENOMEM,
            16 => EBUSY,
            17 => EEXIST,
            18 => EXDEV,
            20 => ENOTDIR,
            21 => EISDIR,
            22 => EINVAL,
            36 => ENAMETOOLONG,
            39 => ENOTEMPTY,
            95 => EOPNOTSUPP,
            _ => return None,
        })
    }
    fn message(self) -> &'static str {
        match self {
            SysError::ENOENT => "No such file or directory",
            SysError::ENOMEM => "Out of memory",
            SysError::EBUSY => "Device or resource busy",
            SysError::EEXIST => "File exists",
            SysError::EXDEV => "Invalid cross-device link",
            SysError::ENOTDIR => "Not a directory",
            SysError::EISDIR => "Is a directory",
            SysError::EINVAL => "Invalid argument",
            SysError::ENAMETOOLONG => "File name too long",
            SysError::ENOTEMPTY => "Directory not empty",
            SysError::EOPNOTSUPP => "Operation not supported",
        }
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.message(), self.errno())
    }
}
