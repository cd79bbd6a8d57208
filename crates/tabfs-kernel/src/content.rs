//! Regular files backed by whole-content accessors.
//!
//! Providers usually know how to fetch or replace a file's entire content
//! (a tab's title, a page's HTML) but not how to serve byte ranges. A
//! [`ContentRoute`] bridges that gap: content is fetched once per `open`,
//! parked in the [`HandleCache`](crate::handles::HandleCache), and sliced or
//! patched in place by subsequent `read`/`write` calls until `release`.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::{FsError, FsResult};
use crate::handles::{SharedHandleCache, checked_len};
use crate::route::{Handler, OpFuture, RouteSpec, handler};
use crate::types::{Attr, OpRequest, mode};

/// Whole-content setter: receives the request and the new content as text.
pub type Setter = Arc<dyn Fn(OpRequest, String) -> OpFuture<()> + Send + Sync>;

/// A regular-file route built from a content getter and optional setter.
#[derive(Clone)]
pub struct ContentRoute {
    handles: SharedHandleCache,
    get: Handler<Vec<u8>>,
    set: Option<Setter>,
    after_write: Option<Setter>,
}

/// Build a read-only content route.
///
/// `get` may produce text or raw bytes; both are sized and sliced as bytes.
pub fn content_route<G, Fut, C>(handles: &SharedHandleCache, get: G) -> ContentRoute
where
    G: Fn(OpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FsResult<C>> + Send + 'static,
    C: Into<Vec<u8>> + 'static,
{
    ContentRoute {
        handles: Arc::clone(handles),
        get: handler(move |req| {
            let fut = get(req);
            async move { fut.await.map(Into::into) }
        }),
        set: None,
        after_write: None,
    }
}

impl ContentRoute {
    /// Accept writes and truncation, passing the full new content to `set`.
    pub fn writable<S, Fut>(mut self, set: S) -> Self
    where
        S: Fn(OpRequest, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<()>> + Send + 'static,
    {
        self.set = Some(Arc::new(move |req, text| set(req, text).boxed()));
        self
    }

    /// Run `hook` with the full content after each `write` has been passed
    /// to the setter. Truncation does not trigger it.
    pub fn after_write<H, Fut>(mut self, hook: H) -> Self
    where
        H: Fn(OpRequest, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<()>> + Send + 'static,
    {
        self.after_write = Some(Arc::new(move |req, text| hook(req, text).boxed()));
        self
    }

    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }

    fn perm(&self) -> u32 {
        if self.is_writable() {
            mode::READ_ONLY | mode::WRITE_ONLY
        } else {
            mode::READ_ONLY
        }
    }

    fn setter(&self, path: &str) -> FsResult<Setter> {
        self.set
            .clone()
            .ok_or_else(|| FsError::not_permitted(format!("{path} is read-only")))
    }

    /// Convert into a [`RouteSpec`] with every content operation filled in.
    pub fn into_spec(self) -> RouteSpec {
        let perm = self.perm();

        let getattr = {
            let get = Arc::clone(&self.get);
            handler(move |req| {
                let content = get(req);
                async move { Ok(Attr::file(content.await?.len() as u64, perm)) }
            })
        };

        let open = {
            let get = Arc::clone(&self.get);
            let handles = Arc::clone(&self.handles);
            handler(move |req: OpRequest| {
                let path = req.path.clone();
                let content = get(req);
                let handles = Arc::clone(&handles);
                async move {
                    let fh = handles.open(&path, content.await?);
                    tracing::trace!(%path, fh, "opened content handle");
                    Ok(fh)
                }
            })
        };

        let read = {
            let handles = Arc::clone(&self.handles);
            handler(move |req: OpRequest| {
                let result = handles.read(req.fh, req.offset, req.size);
                async move { result }
            })
        };

        let write = {
            let route = self.clone();
            handler(move |req: OpRequest| {
                let route = route.clone();
                async move {
                    let set = route.setter(&req.path)?;
                    let written = req.buf.len();
                    let full = route.handles.write(req.fh, req.offset, &req.buf)?;
                    let text = String::from_utf8_lossy(&full).into_owned();
                    match &route.after_write {
                        Some(hook) => {
                            set(req.clone(), text.clone()).await?;
                            hook(req, text).await?;
                        }
                        None => set(req, text).await?,
                    }
                    Ok(written)
                }
            })
        };

        let truncate = {
            let route = self.clone();
            handler(move |req: OpRequest| {
                let route = route.clone();
                async move {
                    let set = route.setter(&req.path)?;
                    let size = checked_len(req.size, route.handles.max_size())?;
                    let mut content = (route.get)(req.clone()).await?;
                    content.resize(size, 0);
                    route.handles.replace_path(&req.path, &content);
                    let text = String::from_utf8_lossy(&content).into_owned();
                    set(req, text).await
                }
            })
        };

        let release = {
            let handles = Arc::clone(&self.handles);
            handler(move |req: OpRequest| {
                if !handles.release(req.fh) {
                    tracing::debug!(path = %req.path, fh = req.fh, "release of unknown handle");
                }
                async { Ok(()) }
            })
        };

        RouteSpec::new()
            .set_getattr(getattr)
            .set_open(open)
            .set_read(read)
            .set_write(write)
            .set_truncate(truncate)
            .set_release(release)
    }
}

impl From<ContentRoute> for RouteSpec {
    fn from(route: ContentRoute) -> Self {
        route.into_spec()
    }
}
