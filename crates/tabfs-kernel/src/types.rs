//! Core filesystem types shared by routes, the dispatcher, and the wire.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::pattern::Bindings;

/// `st_mode` file-type bits.
pub mod mode {
    /// Type of file mask.
    pub const S_IFMT: u32 = 0o170000;
    /// Named pipe.
    pub const S_IFIFO: u32 = 0o010000;
    /// Character special.
    pub const S_IFCHR: u32 = 0o020000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Block special.
    pub const S_IFBLK: u32 = 0o060000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;
    /// Socket.
    pub const S_IFSOCK: u32 = 0o140000;

    pub const READ_ONLY: u32 = 0o444;
    pub const WRITE_ONLY: u32 = 0o222;
    pub const ALL: u32 = 0o777;
    pub const DIR_DEFAULT: u32 = 0o755;
}

/// Null handle returned by routes that keep no per-open state.
pub const NULL_HANDLE: u64 = 0;

/// Attributes reported by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_size: u64,
}

impl Attr {
    /// Attributes for a directory.
    pub fn directory(perm: u32) -> Self {
        Self {
            st_mode: mode::S_IFDIR | perm,
            st_nlink: 3,
            st_size: 0,
        }
    }

    /// Attributes for a regular file.
    pub fn file(size: u64, perm: u32) -> Self {
        Self {
            st_mode: mode::S_IFREG | perm,
            st_nlink: 1,
            st_size: size,
        }
    }

    /// Attributes for a symlink whose target is `target_len` bytes long.
    ///
    /// The reported size is the target length plus one for the terminating
    /// NUL the driver copies out; clients misbehave on any other value.
    pub fn symlink(target_len: usize) -> Self {
        Self {
            st_mode: mode::S_IFLNK | mode::READ_ONLY,
            st_nlink: 1,
            st_size: target_len as u64 + 1,
        }
    }

    /// File-type bits only.
    pub fn file_type(&self) -> u32 {
        self.st_mode & mode::S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == mode::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == mode::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == mode::S_IFLNK
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.st_mode & !mode::S_IFMT
    }
}

/// Filesystem operations a route may implement.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Op {
    Getattr,
    Readdir,
    Opendir,
    Releasedir,
    Readlink,
    Open,
    Read,
    Write,
    Release,
    Truncate,
    Mknod,
    Unlink,
}

/// Decoded request handed to a route operation.
///
/// This is the wire request with the base64 payload already decoded and the
/// path's variable bindings merged in.
#[derive(Debug, Clone)]
pub struct OpRequest {
    pub op: Op,
    pub path: String,
    pub vars: Bindings,
    pub fh: u64,
    pub offset: u64,
    pub size: u64,
    pub buf: Vec<u8>,
    pub flags: i64,
    pub mode: u32,
}

impl OpRequest {
    /// A request with only the operation and path set.
    pub fn new(op: Op, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            vars: Bindings::default(),
            fh: NULL_HANDLE,
            offset: 0,
            size: 0,
            buf: Vec::new(),
            flags: 0,
            mode: 0,
        }
    }

    pub fn with_vars(mut self, vars: Bindings) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_fh(mut self, fh: u64) -> Self {
        self.fh = fh;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_buf(mut self, buf: impl Into<Vec<u8>>) -> Self {
        self.buf = buf.into();
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Payload as UTF-8 text (lossy).
    pub fn buf_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buf)
    }
}

/// Successful result of a route operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `getattr`
    Attr(Attr),
    /// `readdir`
    Entries(Vec<String>),
    /// `open` / `opendir`
    Handle(u64),
    /// `read`
    Data(Vec<u8>),
    /// `readlink`
    Link(String),
    /// `write`: bytes accepted.
    Written(usize),
    /// Everything else.
    Empty,
}

/// Build a directory listing: `.` and `..` followed by `names`.
pub fn listing<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut entries = vec![".".to_string(), "..".to_string()];
    entries.extend(names.into_iter().map(Into::into));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_attr_constructors() {
        let dir = Attr::directory(mode::DIR_DEFAULT);
        assert!(dir.is_dir());
        assert_eq!(dir.perm(), 0o755);
        assert_eq!(dir.st_nlink, 3);

        let file = Attr::file(12, mode::READ_ONLY | mode::WRITE_ONLY);
        assert!(file.is_file());
        assert_eq!(file.perm(), 0o666);
        assert_eq!(file.st_size, 12);
    }

    #[test]
    fn test_symlink_size_counts_nul() {
        let link = Attr::symlink("../by-id/4".len());
        assert!(link.is_symlink());
        assert_eq!(link.st_size, 11);
    }

    #[test]
    fn test_op_names() {
        assert_eq!(Op::from_str("releasedir").unwrap(), Op::Releasedir);
        assert_eq!(Op::Getattr.to_string(), "getattr");
        assert!(Op::from_str("rename").is_err());
    }

    #[test]
    fn test_listing() {
        assert_eq!(listing(["a", "b"]), vec![".", "..", "a", "b"]);
    }
}
