//! Error types.
//!
//! [`FsError`] is what route handlers return. Each variant maps onto one
//! POSIX errno, which is the only thing that crosses the wire; the message
//! and any provider error chain stay in the local log.

use thiserror::Error;

/// POSIX error numbers understood by the kernel-side driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EINTR = 4,
    EIO = 5,
    ENXIO = 6,
    ENOTSUP = 45,
    ETIMEDOUT = 110,
}

impl Errno {
    /// Numeric code sent in the `error` field of a response.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error raised by a route operation or by the dispatcher itself.
#[derive(Debug, Error)]
pub enum FsError {
    /// Operation not permitted (e.g. writing a read-only synthetic file).
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// No route or no underlying entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// The projected entity went away.
    #[error("no such process: {0}")]
    NoSuchProcess(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("no such device: {0}")]
    NoDevice(String),

    /// Operation not supported (resource-fork lookups land here).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Handler did not answer in time.
    #[error("timed out")]
    TimedOut,

    /// A read/write arrived for a handle the cache does not know.
    #[error("stale file handle: {0}")]
    StaleHandle(u64),

    /// Failure inside a data provider.
    #[error("provider error: {0:#}")]
    Provider(#[from] anyhow::Error),
}

impl FsError {
    /// Create a NotPermitted error.
    pub fn not_permitted(msg: impl Into<String>) -> Self {
        Self::NotPermitted(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NoSuchProcess error.
    pub fn no_such_process(msg: impl Into<String>) -> Self {
        Self::NoSuchProcess(msg.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// The errno reported to the driver for this error.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::NotPermitted(_) => Errno::EPERM,
            FsError::NotFound(_) => Errno::ENOENT,
            FsError::NoSuchProcess(_) => Errno::ESRCH,
            FsError::Interrupted(_) => Errno::EINTR,
            FsError::Io(_) => Errno::EIO,
            FsError::NoDevice(_) => Errno::ENXIO,
            FsError::NotSupported(_) => Errno::ENOTSUP,
            FsError::TimedOut => Errno::ETIMEDOUT,
            FsError::StaleHandle(_) => Errno::EIO,
            FsError::Provider(_) => Errno::EIO,
        }
    }

    /// True when the handler explicitly chose this error, as opposed to
    /// something failing underneath it.
    pub fn is_declared(&self) -> bool {
        !matches!(self, FsError::Provider(_) | FsError::StaleHandle(_))
    }
}

/// Result type for route operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_codes() {
        assert_eq!(Errno::EPERM.code(), 1);
        assert_eq!(Errno::ENOENT.code(), 2);
        assert_eq!(Errno::EIO.code(), 5);
        assert_eq!(Errno::ENOTSUP.code(), 45);
        assert_eq!(Errno::ETIMEDOUT.code(), 110);
    }

    #[test]
    fn test_provider_errors_are_eio() {
        let err: FsError = anyhow::anyhow!("tab 7 vanished").into();
        assert_eq!(err.errno(), Errno::EIO);
        assert!(!err.is_declared());
    }

    #[test]
    fn test_declared_kinds() {
        assert_eq!(FsError::not_permitted("ro").errno(), Errno::EPERM);
        assert_eq!(FsError::not_found("/x").errno(), Errno::ENOENT);
        assert_eq!(FsError::not_supported("._x").errno(), Errno::ENOTSUP);
        assert!(FsError::TimedOut.is_declared());
        assert_eq!(FsError::StaleHandle(9).errno(), Errno::EIO);
    }
}
