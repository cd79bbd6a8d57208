//! Route table with most-specific-first pattern routing.
//!
//! The table is built once from a sparse set of declared routes:
//!
//! 1. **Ancestor synthesis.** Every route's parent path gets a directory
//!    route if nothing was declared there. This runs one depth level at a
//!    time, deepest first, so each synthesized directory sees all of its
//!    children (declared or synthesized) before its listing is fixed.
//! 2. **Capability completion.** Each spec becomes a [`Route`] with the
//!    default operations for its capability filled in.
//!
//! Lookups try patterns in ascending variable count, so `/a/b` wins over
//! `/a/:X`. Ties keep declaration order, with synthesized ancestors last.
//!
//! The table is immutable once built. Runtime `insert`/`remove` would be
//! the extension point for dynamic registration.

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::error::{FsError, FsResult};
use crate::content::content_route;
use crate::docs::{RouteDoc, render_html};
use crate::handles::{MemoryHandleCache, SharedHandleCache};
use crate::pattern::{Bindings, PathPattern, PatternError, segment_has_var};
use crate::route::{Route, RouteKind, RouteSpec};
use crate::types::listing;

/// Route table construction error.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// The spec declares none of readdir, readlink, read or write.
    #[error("route {0} declares no readdir, readlink, read or write")]
    NoCapability(String),
}

/// Accumulates declared routes and builds a [`RouteTable`].
pub struct RouteTableBuilder {
    specs: IndexMap<String, RouteSpec>,
    handles: SharedHandleCache,
    docs_at: Option<String>,
}

impl Default for RouteTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTableBuilder {
    /// Builder with a fresh in-memory handle cache.
    pub fn new() -> Self {
        Self::with_handles(MemoryHandleCache::shared())
    }

    /// Builder whose content routes share `handles`.
    pub fn with_handles(handles: SharedHandleCache) -> Self {
        Self {
            specs: IndexMap::new(),
            handles,
            docs_at: None,
        }
    }

    /// The handle cache content routes should use.
    pub fn handles(&self) -> SharedHandleCache {
        Arc::clone(&self.handles)
    }

    /// Declare a route. Declaring the same pattern again replaces it.
    pub fn route(&mut self, pattern: impl Into<String>, spec: impl Into<RouteSpec>) -> &mut Self {
        self.specs.insert(pattern.into(), spec.into());
        self
    }

    /// Serve an HTML page documenting every declared route at `pattern`.
    ///
    /// The page is rendered once, at build time, from the routes declared
    /// by then.
    pub fn route_docs(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.docs_at = Some(pattern.into());
        self
    }

    /// Synthesize ancestors, complete capabilities, and compile patterns.
    pub fn build(self) -> Result<RouteTable, RouteTableError> {
        let Self {
            mut specs,
            handles,
            docs_at,
        } = self;
        if let Some(pattern) = docs_at {
            let spec = docs_route(&handles, &pattern, &specs);
            specs.insert(pattern, spec);
        }
        synthesize_ancestors(&mut specs);

        let mut entries = Vec::with_capacity(specs.len());
        for (pattern, spec) in specs {
            let compiled = PathPattern::compile(&pattern)?;
            let description = spec.description_text().map(str::to_string);
            let usage = spec.usage_examples().to_vec();
            let declared = spec.declared_ops();
            let route = spec
                .complete()
                .ok_or_else(|| RouteTableError::NoCapability(pattern.clone()))?;
            for op in declared.iter().filter(|op| !route.supports(**op)) {
                tracing::warn!(%pattern, %op, kind = %route.kind(), "operation ignored for route kind");
            }
            entries.push(RouteEntry {
                pattern: compiled,
                route,
                description,
                usage,
            });
        }

        // Stable: equal variable counts keep declaration order.
        entries.sort_by_key(|e| e.pattern.var_count());

        tracing::debug!(routes = entries.len(), "route table built");
        Ok(RouteTable { entries, handles })
    }
}

const DOCS_DESCRIPTION: &str = "Documentation for every file and folder, with usage examples.";
const DOCS_USAGE: &str = "cp $0 ~/routes.html";

fn docs_route(
    handles: &SharedHandleCache,
    pattern: &str,
    specs: &IndexMap<String, RouteSpec>,
) -> RouteSpec {
    let mut docs: Vec<RouteDoc> = specs
        .iter()
        .filter(|(p, _)| p.as_str() != pattern)
        .map(|(p, s)| RouteDoc::from_spec(p, s))
        .collect();
    docs.push(RouteDoc {
        pattern: pattern.to_string(),
        is_dir: false,
        description: Some(DOCS_DESCRIPTION.to_string()),
        usage: vec![DOCS_USAGE.to_string()],
    });
    let html = render_html(&docs);
    tracing::debug!(%pattern, routes = docs.len(), "rendered route docs");

    let page = content_route(handles, move |_| {
        let html = html.clone();
        async move { Ok(html) }
    });
    RouteSpec::from(page)
        .description(DOCS_DESCRIPTION)
        .usage(DOCS_USAGE)
}

/// Number of segments in a pattern; `/` is depth 0.
fn depth(pattern: &str) -> usize {
    if pattern == "/" {
        0
    } else {
        pattern.matches('/').count()
    }
}

/// Parent pattern, or `None` for `/`.
fn parent(pattern: &str) -> Option<&str> {
    if pattern == "/" {
        return None;
    }
    match pattern.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&pattern[..i]),
        None => None,
    }
}

/// Last segment of a pattern.
fn last_segment(pattern: &str) -> &str {
    pattern.rsplit('/').next().unwrap_or(pattern)
}

fn synthesize_ancestors(specs: &mut IndexMap<String, RouteSpec>) {
    let max_depth = specs.keys().map(|k| depth(k)).max().unwrap_or(0);

    for level in (1..=max_depth).rev() {
        let children: Vec<String> = specs
            .keys()
            .filter(|k| depth(k) == level)
            .cloned()
            .collect();

        // Group this level's children under parents that were not declared.
        let mut listings: IndexMap<String, Vec<String>> = IndexMap::new();
        for child in &children {
            let Some(parent) = parent(child) else { continue };
            if specs.contains_key(parent) {
                continue;
            }
            let names = listings.entry(parent.to_string()).or_default();
            let name = last_segment(child);
            if !segment_has_var(name) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        for (parent, names) in listings {
            tracing::trace!(%parent, ?names, "synthesizing directory");
            let entries = listing(names);
            let spec = RouteSpec::new().readdir(move |_| {
                let entries = entries.clone();
                async move { Ok(entries) }
            });
            specs.insert(parent, spec);
        }
    }

    if !specs.contains_key("/") {
        specs.insert(
            "/".to_string(),
            RouteSpec::new().readdir(|_| async { Ok(listing(Vec::<String>::new())) }),
        );
    }
}

/// One compiled route.
#[derive(Debug)]
pub struct RouteEntry {
    pub pattern: PathPattern,
    pub route: Route,
    pub description: Option<String>,
    pub usage: Vec<String>,
}

impl RouteEntry {
    pub fn kind(&self) -> RouteKind {
        self.route.kind()
    }
}

/// Immutable, priority-ordered route table.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    handles: SharedHandleCache,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.entries.len())
            .field("open_handles", &self.handles.len())
            .finish()
    }
}

impl RouteTable {
    /// Find the most specific route matching `path`.
    pub fn resolve(&self, path: &str) -> FsResult<(&Route, Bindings)> {
        self.entries
            .iter()
            .find_map(|e| e.pattern.matches(path).map(|vars| (&e.route, vars)))
            .ok_or_else(|| FsError::not_found(path))
    }

    /// Look up a route by its exact pattern text.
    pub fn get(&self, pattern: &str) -> Option<&Route> {
        self.entries
            .iter()
            .find(|e| e.pattern.as_str() == pattern)
            .map(|e| &e.route)
    }

    /// All routes in match-priority order.
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The handle cache shared by this table's content routes.
    pub fn handles(&self) -> &SharedHandleCache {
        &self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Value;
    use crate::types::{Op, OpRequest, Reply};
    use std::collections::HashSet;

    fn file() -> RouteSpec {
        RouteSpec::new().read(|_| async { Ok(b"data".to_vec()) })
    }

    fn names(reply: Reply) -> HashSet<String> {
        match reply {
            Reply::Entries(entries) => entries.into_iter().collect(),
            other => panic!("expected entries, got {other:?}"),
        }
    }

    async fn readdir(table: &RouteTable, pattern: &str) -> HashSet<String> {
        let route = table.get(pattern).expect("route exists");
        names(route.invoke(OpRequest::new(Op::Readdir, pattern)).await.unwrap())
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ancestor_synthesis() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/tabs/create", RouteSpec::new().write(|r| async move { Ok(r.buf.len()) }))
            .route("/tabs/by-id", RouteSpec::new().readdir(|_| async { Ok(listing(["1"])) }))
            .route("/tabs/by-title", RouteSpec::new().readdir(|_| async { Ok(listing(["t.1"])) }))
            .route("/tabs/last-focused", RouteSpec::new().readlink(|_| async { Ok("by-id/1".into()) }));
        let table = builder.build().unwrap();

        assert_eq!(
            readdir(&table, "/tabs").await,
            set(&[".", "..", "create", "by-id", "by-title", "last-focused"])
        );
        assert_eq!(readdir(&table, "/").await, set(&[".", "..", "tabs"]));
    }

    #[tokio::test]
    async fn test_variable_children_hidden_from_listing() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/tabs/by-id/#TAB_ID/url.txt", file())
            .route("/tabs/by-id/#TAB_ID/title.txt", file())
            .route("/tabs/by-id/#TAB_ID/evals/:FILENAME", file());
        let table = builder.build().unwrap();

        assert_eq!(
            readdir(&table, "/tabs/by-id/#TAB_ID").await,
            set(&[".", "..", "url.txt", "title.txt", "evals"])
        );
        assert_eq!(readdir(&table, "/tabs/by-id").await, set(&[".", ".."]));
        assert_eq!(readdir(&table, "/tabs/by-id/#TAB_ID/evals").await, set(&[".", ".."]));
        assert_eq!(readdir(&table, "/").await, set(&[".", "..", "tabs"]));
    }

    #[tokio::test]
    async fn test_deep_chain_listed_level_by_level() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/a/b/c/d.txt", file())
            .route("/a/x.txt", file())
            .route("/a/b/y.txt", file());
        let table = builder.build().unwrap();

        assert_eq!(readdir(&table, "/a").await, set(&[".", "..", "b", "x.txt"]));
        assert_eq!(readdir(&table, "/a/b").await, set(&[".", "..", "c", "y.txt"]));
        assert_eq!(readdir(&table, "/a/b/c").await, set(&[".", "..", "d.txt"]));
    }

    #[tokio::test]
    async fn test_declared_parent_not_replaced() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/tabs", RouteSpec::new().readdir(|_| async { Ok(listing(["custom"])) }))
            .route("/tabs/create", file());
        let table = builder.build().unwrap();
        assert_eq!(readdir(&table, "/tabs").await, set(&[".", "..", "custom"]));
    }

    #[test]
    fn test_most_specific_wins() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/a/:X", RouteSpec::new().read(|_| async { Ok(b"var".to_vec()) }))
            .route("/a/b", RouteSpec::new().read(|_| async { Ok(b"lit".to_vec()) }));
        let table = builder.build().unwrap();

        let (_, vars) = table.resolve("/a/b").unwrap();
        assert!(vars.is_empty());
        let (_, vars) = table.resolve("/a/c").unwrap();
        assert_eq!(vars.get("x"), Some(&Value::Str("c".into())));
    }

    #[tokio::test]
    async fn test_most_specific_route_is_invoked() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/a/:X", RouteSpec::new().read(|_| async { Ok(b"var".to_vec()) }))
            .route("/a/b", RouteSpec::new().read(|_| async { Ok(b"lit".to_vec()) }));
        let table = builder.build().unwrap();

        let (route, _) = table.resolve("/a/b").unwrap();
        let reply = route.invoke(OpRequest::new(Op::Read, "/a/b")).await.unwrap();
        assert_eq!(reply, Reply::Data(b"lit".to_vec()));
    }

    #[test]
    fn test_type_coercion_through_table() {
        let mut builder = RouteTableBuilder::new();
        builder.route("/tabs/by-id/#TAB_ID/url.txt", file());
        let table = builder.build().unwrap();
        let (_, vars) = table.resolve("/tabs/by-id/10/url.txt").unwrap();
        assert_eq!(vars.get("tabId"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_root_resolves_with_no_bindings() {
        let mut builder = RouteTableBuilder::new();
        builder.route("/tabs/create", file());
        let table = builder.build().unwrap();
        let (route, vars) = table.resolve("/").unwrap();
        assert_eq!(route.kind(), RouteKind::Directory);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_no_match_is_enoent() {
        let mut builder = RouteTableBuilder::new();
        builder.route("/tabs/create", file());
        let table = builder.build().unwrap();
        assert!(matches!(table.resolve("/nope"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_empty_table_has_root() {
        let table = RouteTableBuilder::new().build().unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.resolve("/").is_ok());
    }

    #[test]
    fn test_no_capability_rejected() {
        let mut builder = RouteTableBuilder::new();
        builder.route("/x", RouteSpec::new().unlink(|_| async { Ok(()) }));
        assert!(matches!(
            builder.build(),
            Err(RouteTableError::NoCapability(p)) if p == "/x"
        ));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut builder = RouteTableBuilder::new();
        builder.route("/#ID/#ID", file());
        assert!(matches!(builder.build(), Err(RouteTableError::Pattern(_))));
    }

    #[tokio::test]
    async fn test_route_docs_page() {
        let mut builder = RouteTableBuilder::new();
        builder
            .route(
                "/tabs/create",
                RouteSpec::new()
                    .write(|r| async move { Ok(r.buf.len()) })
                    .description("Create a new tab.")
                    .usage("echo URL > $0"),
            )
            .route_docs("/runtime/routes.html");
        let table = builder.build().unwrap();

        let runtime = readdir(&table, "/runtime").await;
        assert_eq!(runtime, set(&[".", "..", "routes.html"]));

        let (route, _) = table.resolve("/runtime/routes.html").unwrap();
        let Reply::Handle(fh) = route
            .invoke(OpRequest::new(Op::Open, "/runtime/routes.html"))
            .await
            .unwrap()
        else {
            panic!("expected handle");
        };
        let req = OpRequest::new(Op::Read, "/runtime/routes.html")
            .with_fh(fh)
            .with_size(1 << 20);
        let Reply::Data(page) = route.invoke(req).await.unwrap() else {
            panic!("expected data");
        };
        let page = String::from_utf8(page).unwrap();
        assert!(page.contains("tabs/create</dt>"));
        assert!(page.contains("<code>echo URL &gt; tabs/create</code>"));
        assert!(page.contains("runtime/routes.html</dt>"));
        // Synthesized directories are not documented.
        assert!(!page.contains("&#x1F4C1; runtime</dt>"));
    }

    #[test]
    fn test_depth_and_parent() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/tabs"), 1);
        assert_eq!(depth("/tabs/by-id/#TAB_ID"), 3);
        assert_eq!(parent("/tabs"), Some("/"));
        assert_eq!(parent("/tabs/by-id"), Some("/tabs"));
        assert_eq!(parent("/"), None);
    }
}
