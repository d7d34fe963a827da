//! tidemark keeps a local SQLite mirror of remote, integer-indexed item
//! collections and serves filtered reads from it.
//!
//! - [`transport`]: bounded-concurrency JSON fetching
//! - [`storage`]: the cache store (sources and cached entries)
//! - [`sources`]: the registry of configured sources and their item formats
//! - [`sync`]: catch-up cycles from the remote latest index to the local cache
//! - [`query`]: the read path used by the command-line front end

pub mod config;
pub mod query;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod util;
