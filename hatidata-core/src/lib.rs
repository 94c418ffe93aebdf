//! # hatidata-core
//!
//! Local agent-state engine for the HatiData warehouse: per-agent memory,
//! a hash-chained chain-of-thought ledger, semantic triggers, and
//! copy-on-write data branches over a single embedded DuckDB file, all
//! surfaced through a uniform tool-call interface and a stdio JSON-RPC
//! loop.
//!
//! ## Architecture
//!
//! - **Engine** ([`engine::LocalEngine`]) — typed operations over the
//!   embedded database; schemas bootstrap lazily on first touch.
//! - **Backends** ([`backend::Backend`]) — the engine and a SQL-only
//!   remote endpoint share the `query`/`execute` capability set; the
//!   [`dispatcher::Dispatcher`] behaves identically over either.
//! - **Server** ([`server`]) — newline-delimited JSON-RPC 2.0 over stdio.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hatidata_core::backend::Backend;
//! use hatidata_core::dispatcher::Dispatcher;
//! use hatidata_core::engine::LocalEngine;
//!
//! let engine = LocalEngine::open(std::path::Path::new(".hati/local.duckdb"))
//!     .expect("failed to open database");
//! let dispatcher = Dispatcher::new(Backend::Local(engine), "mcp-agent");
//! hatidata_core::server::run_stdio(&dispatcher).expect("server loop failed");
//! ```

// Re-export commonly used items at the crate root
pub use backend::{Backend, JsonRow, SqlBackend, SqlParam};
pub use dispatcher::{Dispatcher, ToolResult};
pub use engine::LocalEngine;
pub use error::{Error, Result};
pub use remote::{RemoteClient, RemoteConfig};
pub use types::*;

// Public modules
pub mod backend;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod remote;
pub mod server;
pub mod tools;
pub mod types;
