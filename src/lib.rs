//! npm-sync - keeps Nginx Proxy Manager proxy hosts in line with a
//! declarative host list
//!
//! This library:
//! - Loads desired proxy hosts from a JSON or YAML document
//! - Derives the wildcard certificates those hosts need and matches them
//!   against the certificates already held by the manager
//! - Creates missing hosts and replaces existing ones, one pass at a time
//! - Re-runs the pass whenever the document changes, with debouncing

pub mod certs;
pub mod client;
pub mod config;
pub mod error;
pub mod hosts;
pub mod reconcile;
pub mod watch;
pub mod wildcard;

pub use error::{ErrorKind, Result, SyncError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
