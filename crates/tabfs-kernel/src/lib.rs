//! # tabfs-kernel
//!
//! Request router for a FUSE-style virtual filesystem.
//!
//! A filesystem driver sends operation records (`getattr`, `readdir`,
//! `open`, `read`, `write`, ...) addressed by path. The kernel:
//! - Compiles path templates with typed variables (`/tabs/by-id/#TAB_ID`)
//!   into a most-specific-first [`RouteTable`]
//! - Synthesizes directory routes for every undeclared ancestor and fills
//!   in the default operations each route's capability needs
//! - Turns whole-content getters/setters into byte-addressable files
//!   backed by an open-handle cache
//! - Renders declared routes' descriptions and usage as an HTML page
//! - Dispatches records from a transport, answering each exactly once,
//!   with a timeout for handlers that hang

pub mod config;
pub mod content;
pub mod dispatch;
pub mod docs;
pub mod error;
pub mod handles;
pub mod pattern;
pub mod protocol;
pub mod route;
pub mod sanitize;
pub mod table;
pub mod transport;
pub mod types;
pub mod writable;

pub use config::{Config, ConfigError, TransportKind};
pub use content::{ContentRoute, content_route};
pub use dispatch::{DEFAULT_TIMEOUT, Dispatcher, is_shadow_path};
pub use docs::{RouteDoc, render_html};
pub use error::{Errno, FsError, FsResult};
pub use handles::{
    DEFAULT_MAX_FILE_BYTES, HandleCache, MemoryHandleCache, SharedHandleCache, checked_len,
};
pub use pattern::{Bindings, PathPattern, PatternError, Value, VarType};
pub use protocol::{WireRequest, WireResponse};
pub use route::{Route, RouteKind, RouteSpec};
pub use sanitize::sanitize;
pub use table::{RouteEntry, RouteTable, RouteTableBuilder, RouteTableError};
pub use transport::{
    LengthPrefixedReader, LengthPrefixedWriter, RecordSink, RecordSource, TransportError,
    channel_transport,
};
pub use types::{Attr, NULL_HANDLE, Op, OpRequest, Reply, listing, mode};
pub use writable::WritableDirectory;
