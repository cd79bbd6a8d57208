//! Routes: the behavior bound to one path pattern.
//!
//! A [`RouteSpec`] is what route authors declare: any subset of the
//! operations plus some documentation. [`RouteSpec::complete`] turns it into
//! a [`Route`], whose variant is the capability inferred from the declared
//! primitives (`readdir` → directory, else `readlink` → symlink, else
//! `read`/`write` → regular file) and which carries a full operation set for
//! that capability. Declared handlers always win over the defaults.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{FsError, FsResult};
use crate::types::{Attr, NULL_HANDLE, Op, OpRequest, Reply, mode};

/// Size reported by the default `getattr` of regular-file routes, which
/// have no way to know their content length up front.
pub const DEFAULT_FILE_SIZE: u64 = 100;

/// Boxed future returned by route operations.
pub type OpFuture<T> = BoxFuture<'static, FsResult<T>>;

/// A type-erased route operation.
pub type Handler<T> = Arc<dyn Fn(OpRequest) -> OpFuture<T> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(OpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsResult<T>> + Send + 'static,
    T: 'static,
{
    Arc::new(move |req| f(req).boxed())
}

fn constant<T: Clone + Send + Sync + 'static>(value: T) -> Handler<T> {
    handler(move |_| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

/// Capability of a completed route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RouteKind {
    Directory,
    Symlink,
    File,
}

/// A partially specified route, as declared.
#[derive(Clone, Default)]
pub struct RouteSpec {
    getattr: Option<Handler<Attr>>,
    readdir: Option<Handler<Vec<String>>>,
    opendir: Option<Handler<u64>>,
    releasedir: Option<Handler<()>>,
    readlink: Option<Handler<String>>,
    open: Option<Handler<u64>>,
    read: Option<Handler<Vec<u8>>>,
    write: Option<Handler<usize>>,
    release: Option<Handler<()>>,
    truncate: Option<Handler<()>>,
    mknod: Option<Handler<()>>,
    unlink: Option<Handler<()>>,
    description: Option<String>,
    usage: Vec<String>,
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("ops", &self.declared_ops())
            .field("description", &self.description)
            .finish()
    }
}

macro_rules! spec_setter {
    ($name:ident, $t:ty, $doc:literal) => {
        #[doc = $doc]
        pub fn $name<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(OpRequest) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = FsResult<$t>> + Send + 'static,
        {
            self.$name = Some(handler(f));
            self
        }
    };
}

impl RouteSpec {
    pub fn new() -> Self {
        Self::default()
    }

    spec_setter!(getattr, Attr, "Set `getattr`.");
    spec_setter!(readdir, Vec<String>, "Set `readdir`. Entries should include `.` and `..`.");
    spec_setter!(opendir, u64, "Set `opendir`.");
    spec_setter!(releasedir, (), "Set `releasedir`.");
    spec_setter!(readlink, String, "Set `readlink`.");
    spec_setter!(open, u64, "Set `open`.");
    spec_setter!(read, Vec<u8>, "Set `read`.");
    spec_setter!(write, usize, "Set `write`; returns the number of bytes accepted.");
    spec_setter!(release, (), "Set `release`.");
    spec_setter!(truncate, (), "Set `truncate`.");
    spec_setter!(mknod, (), "Set `mknod`.");
    spec_setter!(unlink, (), "Set `unlink`.");

    /// Set an already type-erased handler for `op`'s slot.
    pub(crate) fn set_getattr(mut self, h: Handler<Attr>) -> Self {
        self.getattr = Some(h);
        self
    }

    pub(crate) fn set_open(mut self, h: Handler<u64>) -> Self {
        self.open = Some(h);
        self
    }

    pub(crate) fn set_read(mut self, h: Handler<Vec<u8>>) -> Self {
        self.read = Some(h);
        self
    }

    pub(crate) fn set_write(mut self, h: Handler<usize>) -> Self {
        self.write = Some(h);
        self
    }

    pub(crate) fn set_release(mut self, h: Handler<()>) -> Self {
        self.release = Some(h);
        self
    }

    pub(crate) fn set_truncate(mut self, h: Handler<()>) -> Self {
        self.truncate = Some(h);
        self
    }

    /// One-line description, shown by the route listing.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Add a usage example (`$0` stands for the route's path).
    pub fn usage(mut self, example: impl Into<String>) -> Self {
        self.usage.push(example.into());
        self
    }

    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn usage_examples(&self) -> &[String] {
        &self.usage
    }

    /// Operations this spec declares explicitly.
    pub fn declared_ops(&self) -> Vec<Op> {
        let slots = [
            (Op::Getattr, self.getattr.is_some()),
            (Op::Readdir, self.readdir.is_some()),
            (Op::Opendir, self.opendir.is_some()),
            (Op::Releasedir, self.releasedir.is_some()),
            (Op::Readlink, self.readlink.is_some()),
            (Op::Open, self.open.is_some()),
            (Op::Read, self.read.is_some()),
            (Op::Write, self.write.is_some()),
            (Op::Release, self.release.is_some()),
            (Op::Truncate, self.truncate.is_some()),
            (Op::Mknod, self.mknod.is_some()),
            (Op::Unlink, self.unlink.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(op, set)| set.then_some(op))
            .collect()
    }

    /// The capability this spec implies, if any.
    pub fn kind(&self) -> Option<RouteKind> {
        if self.readdir.is_some() {
            Some(RouteKind::Directory)
        } else if self.readlink.is_some() {
            Some(RouteKind::Symlink)
        } else if self.read.is_some() || self.write.is_some() {
            Some(RouteKind::File)
        } else {
            None
        }
    }

    /// Fill in the default operations for this spec's capability.
    ///
    /// Returns `None` if the spec declares none of `readdir`, `readlink`,
    /// `read` or `write`.
    pub fn complete(self) -> Option<Route> {
        let kind = self.kind()?;
        let route = match kind {
            RouteKind::Directory => Route::Directory(DirectoryOps {
                getattr: self
                    .getattr
                    .unwrap_or_else(|| constant(Attr::directory(mode::DIR_DEFAULT))),
                readdir: self.readdir?,
                opendir: self.opendir.unwrap_or_else(|| constant(NULL_HANDLE)),
                releasedir: self.releasedir.unwrap_or_else(|| constant(())),
            }),
            RouteKind::Symlink => {
                let readlink = self.readlink?;
                let getattr = match self.getattr {
                    Some(getattr) => getattr,
                    None => symlink_getattr(readlink.clone()),
                };
                Route::Symlink(SymlinkOps {
                    getattr,
                    readlink,
                    unlink: self.unlink,
                })
            }
            RouteKind::File => {
                let mut perm = 0;
                if self.read.is_some() {
                    perm |= mode::READ_ONLY;
                }
                if self.write.is_some() {
                    perm |= mode::WRITE_ONLY;
                }
                Route::File(FileOps {
                    getattr: self
                        .getattr
                        .unwrap_or_else(|| constant(Attr::file(DEFAULT_FILE_SIZE, perm))),
                    open: self.open.unwrap_or_else(|| constant(NULL_HANDLE)),
                    release: self.release.unwrap_or_else(|| constant(())),
                    read: self.read,
                    write: self.write,
                    truncate: self.truncate,
                    mknod: self.mknod,
                    unlink: self.unlink,
                })
            }
        };
        Some(route)
    }
}

/// Symlink `getattr` derived from the link target's length.
fn symlink_getattr(readlink: Handler<String>) -> Handler<Attr> {
    handler(move |req| {
        let target = readlink(req);
        async move { Ok(Attr::symlink(target.await?.len())) }
    })
}

/// Operations of a directory route.
#[derive(Clone)]
pub struct DirectoryOps {
    pub getattr: Handler<Attr>,
    pub readdir: Handler<Vec<String>>,
    pub opendir: Handler<u64>,
    pub releasedir: Handler<()>,
}

/// Operations of a symlink route.
#[derive(Clone)]
pub struct SymlinkOps {
    pub getattr: Handler<Attr>,
    pub readlink: Handler<String>,
    pub unlink: Option<Handler<()>>,
}

/// Operations of a regular-file route.
#[derive(Clone)]
pub struct FileOps {
    pub getattr: Handler<Attr>,
    pub open: Handler<u64>,
    pub release: Handler<()>,
    pub read: Option<Handler<Vec<u8>>>,
    pub write: Option<Handler<usize>>,
    pub truncate: Option<Handler<()>>,
    pub mknod: Option<Handler<()>>,
    pub unlink: Option<Handler<()>>,
}

/// A completed route.
#[derive(Clone)]
pub enum Route {
    Directory(DirectoryOps),
    Symlink(SymlinkOps),
    File(FileOps),
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Route").field(&self.kind()).finish()
    }
}

fn wrap<T: Send + 'static>(fut: OpFuture<T>, reply: fn(T) -> Reply) -> OpFuture<Reply> {
    async move { fut.await.map(reply) }.boxed()
}

fn empty(_: ()) -> Reply {
    Reply::Empty
}

impl Route {
    pub fn kind(&self) -> RouteKind {
        match self {
            Route::Directory(_) => RouteKind::Directory,
            Route::Symlink(_) => RouteKind::Symlink,
            Route::File(_) => RouteKind::File,
        }
    }

    /// Whether this route implements `op`.
    pub fn supports(&self, op: Op) -> bool {
        match self {
            Route::Directory(_) => matches!(
                op,
                Op::Getattr | Op::Readdir | Op::Opendir | Op::Releasedir
            ),
            Route::Symlink(s) => match op {
                Op::Getattr | Op::Readlink => true,
                Op::Unlink => s.unlink.is_some(),
                _ => false,
            },
            Route::File(f) => match op {
                Op::Getattr | Op::Open | Op::Release => true,
                Op::Read => f.read.is_some(),
                Op::Write => f.write.is_some(),
                Op::Truncate => f.truncate.is_some(),
                Op::Mknod => f.mknod.is_some(),
                Op::Unlink => f.unlink.is_some(),
                _ => false,
            },
        }
    }

    /// Start `req.op` on this route, or `None` if the route lacks it.
    pub fn call(&self, req: OpRequest) -> Option<OpFuture<Reply>> {
        let fut = match (self, req.op) {
            (Route::Directory(d), Op::Getattr) => wrap((d.getattr)(req), Reply::Attr),
            (Route::Directory(d), Op::Readdir) => wrap((d.readdir)(req), Reply::Entries),
            (Route::Directory(d), Op::Opendir) => wrap((d.opendir)(req), Reply::Handle),
            (Route::Directory(d), Op::Releasedir) => wrap((d.releasedir)(req), empty),

            (Route::Symlink(s), Op::Getattr) => wrap((s.getattr)(req), Reply::Attr),
            (Route::Symlink(s), Op::Readlink) => wrap((s.readlink)(req), Reply::Link),
            (Route::Symlink(s), Op::Unlink) => wrap((s.unlink.as_ref()?)(req), empty),

            (Route::File(f), Op::Getattr) => wrap((f.getattr)(req), Reply::Attr),
            (Route::File(f), Op::Open) => wrap((f.open)(req), Reply::Handle),
            (Route::File(f), Op::Release) => wrap((f.release)(req), empty),
            (Route::File(f), Op::Read) => wrap((f.read.as_ref()?)(req), Reply::Data),
            (Route::File(f), Op::Write) => wrap((f.write.as_ref()?)(req), Reply::Written),
            (Route::File(f), Op::Truncate) => wrap((f.truncate.as_ref()?)(req), empty),
            (Route::File(f), Op::Mknod) => wrap((f.mknod.as_ref()?)(req), empty),
            (Route::File(f), Op::Unlink) => wrap((f.unlink.as_ref()?)(req), empty),

            _ => return None,
        };
        Some(fut)
    }

    /// Run `req.op` to completion.
    ///
    /// A missing operation is reported as an I/O error; completion should
    /// have made every reachable operation exist.
    pub async fn invoke(&self, req: OpRequest) -> FsResult<Reply> {
        let op = req.op;
        match self.call(req) {
            Some(fut) => fut.await,
            None => Err(FsError::io(format!(
                "{} route does not implement {op}",
                self.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(op: Op) -> OpRequest {
        OpRequest::new(op, "/x")
    }

    #[tokio::test]
    async fn test_directory_defaults() {
        let route = RouteSpec::new()
            .readdir(|_| async { Ok(crate::types::listing(["a"])) })
            .complete()
            .unwrap();
        assert_eq!(route.kind(), RouteKind::Directory);

        let Reply::Attr(attr) = route.invoke(req(Op::Getattr)).await.unwrap() else {
            panic!("expected attr");
        };
        assert!(attr.is_dir());
        assert_eq!(attr.perm(), 0o755);
        assert_eq!(
            route.invoke(req(Op::Opendir)).await.unwrap(),
            Reply::Handle(NULL_HANDLE)
        );
        assert_eq!(route.invoke(req(Op::Releasedir)).await.unwrap(), Reply::Empty);
        assert!(!route.supports(Op::Read));
    }

    #[tokio::test]
    async fn test_symlink_size_is_target_len_plus_one() {
        let route = RouteSpec::new()
            .readlink(|_| async { Ok("../by-id/123".to_string()) })
            .complete()
            .unwrap();
        let Reply::Attr(attr) = route.invoke(req(Op::Getattr)).await.unwrap() else {
            panic!("expected attr");
        };
        assert!(attr.is_symlink());
        assert_eq!(attr.st_size, "../by-id/123".len() as u64 + 1);
    }

    #[tokio::test]
    async fn test_file_perm_bits_follow_ops() {
        let write_only = RouteSpec::new()
            .write(|r| async move { Ok(r.buf.len()) })
            .complete()
            .unwrap();
        let Reply::Attr(attr) = write_only.invoke(req(Op::Getattr)).await.unwrap() else {
            panic!("expected attr");
        };
        assert!(attr.is_file());
        assert_eq!(attr.perm(), 0o222);
        assert_eq!(attr.st_size, DEFAULT_FILE_SIZE);
        assert_eq!(
            write_only.invoke(req(Op::Open)).await.unwrap(),
            Reply::Handle(NULL_HANDLE)
        );
        assert!(write_only.invoke(req(Op::Read)).await.is_err());
    }

    #[tokio::test]
    async fn test_declared_ops_override_defaults() {
        let route = RouteSpec::new()
            .readdir(|_| async { Ok(vec![]) })
            .getattr(|_| async { Ok(Attr::directory(mode::ALL)) })
            .complete()
            .unwrap();
        let Reply::Attr(attr) = route.invoke(req(Op::Getattr)).await.unwrap() else {
            panic!("expected attr");
        };
        assert_eq!(attr.perm(), 0o777);
    }

    #[test]
    fn test_capability_priority() {
        let spec = RouteSpec::new()
            .readlink(|_| async { Ok(String::new()) })
            .read(|_| async { Ok(vec![]) })
            .readdir(|_| async { Ok(vec![]) });
        assert_eq!(spec.kind(), Some(RouteKind::Directory));

        let spec = RouteSpec::new()
            .read(|_| async { Ok(vec![]) })
            .readlink(|_| async { Ok(String::new()) });
        assert_eq!(spec.kind(), Some(RouteKind::Symlink));
    }

    #[test]
    fn test_no_capability() {
        let spec = RouteSpec::new().unlink(|_| async { Ok(()) });
        assert_eq!(spec.kind(), None);
        assert!(spec.complete().is_none());
    }
}
