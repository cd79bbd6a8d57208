//! In-memory directories users can create, write and remove files in.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;

use crate::content::{Setter, content_route};
use crate::error::{FsError, FsResult};
use crate::handles::SharedHandleCache;
use crate::route::RouteSpec;
use crate::types::{Attr, OpRequest, listing, mode};

/// A directory of user-created files, keyed by full path.
///
/// One instance usually backs a pattern pair such as `/x/#ID/evals` and
/// `/x/#ID/evals/:FILENAME`; each concrete directory lists only its own
/// files.
#[derive(Clone, Default)]
pub struct WritableDirectory {
    files: Arc<DashMap<String, String>>,
    on_write: Option<Setter>,
}

impl std::fmt::Debug for WritableDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableDirectory")
            .field("files", &self.files.len())
            .finish()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl WritableDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` after every `write` has been stored. Truncation and `mknod`
    /// only store.
    pub fn on_write<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OpRequest, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FsResult<()>> + Send + 'static,
    {
        self.on_write = Some(Arc::new(move |req, text| f(req, text).boxed()));
        self
    }

    /// Content of the file at `path`.
    pub fn get(&self, path: &str) -> Option<String> {
        self.files.get(path).map(|f| f.clone())
    }

    /// Create or replace the file at `path`.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.remove(path).map(|(_, content)| content)
    }

    /// Names of the files directly under `dir`.
    pub fn names(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter(|f| parent_of(f.key()) == dir)
            .map(|f| file_name(f.key()).to_string())
            .collect();
        names.sort();
        names
    }

    /// Route for the directory itself. Mode `0777` so files can be created.
    pub fn dir_route(&self) -> RouteSpec {
        let dir = self.clone();
        RouteSpec::new()
            .getattr(|_| async { Ok(Attr::directory(mode::ALL)) })
            .readdir(move |req| {
                let names = dir.names(&req.path);
                async move { Ok(listing(names)) }
            })
    }

    /// Route for the files in the directory.
    pub fn file_route(&self, handles: &SharedHandleCache) -> RouteSpec {
        let get_dir = self.clone();
        let set_dir = self.clone();
        let mknod_dir = self.clone();
        let unlink_dir = self.clone();

        let mut content = content_route(handles, move |req: OpRequest| {
            let content = get_dir
                .get(&req.path)
                .ok_or_else(|| FsError::not_found(req.path.clone()));
            async move { content }
        })
        .writable(move |req: OpRequest, text: String| {
            set_dir.insert(req.path, text);
            async { Ok(()) }
        });
        if let Some(hook) = self.on_write.clone() {
            content = content.after_write(move |req, text| hook(req, text));
        }
        let spec: RouteSpec = content.into();

        spec.mknod(move |req| {
            mknod_dir.insert(req.path, String::new());
            async { Ok(()) }
        })
        .unlink(move |req| {
            let removed = unlink_dir.remove(&req.path);
            async move {
                removed
                    .map(|_| ())
                    .ok_or_else(|| FsError::not_found(req.path))
            }
        })
    }
}
