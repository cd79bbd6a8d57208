//! # tabfs-server
//!
//! Browser tabs and windows as a filesystem, served through
//! [`tabfs_kernel`]'s router.
//!
//! - [`browser`]: the [`Browser`](browser::Browser) provider trait and an
//!   in-memory implementation
//! - [`routes`]: the `/tabs`, `/windows` and `/runtime` hierarchy
//! - [`listener`]: stdio and Unix socket transports for the binary

pub mod browser;
pub mod listener;
pub mod routes;

pub use browser::{Browser, MemoryBrowser, SharedBrowser, Tab, TabCommand, TabUpdate, Window};
pub use routes::{build_table, build_table_with_handles, declare_routes};
