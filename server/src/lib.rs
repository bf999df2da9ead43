//! Fazt hosting kernel.
//!
//! A single server process that hosts many independent applications on
//! subdomains: it serves their static assets out of a database-backed
//! virtual file system, executes their serverless JavaScript handlers,
//! persists their state behind a single-writer queue, and multiplexes
//! realtime WebSocket traffic through per-site hubs.

pub mod admin;
pub mod alias;
pub mod core;
pub mod deploy;
pub mod egress;
pub mod prelude;
pub mod realtime;
pub mod routes;
pub mod runtime;
pub mod static_serve;
pub mod vfs;

pub use crate::core::app::{App, AppBuilder, AppState};
pub use fazt_types::error::{Error, FzResult, NetCode, NetError};
pub use fazt_types::store_adapter::StoreAdapter;
pub use fazt_types::{types, utils};

// vim: ts=4
