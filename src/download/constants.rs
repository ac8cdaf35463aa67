//! Constants for the download engine (timeouts, chunking defaults).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default byte-range size for chunked transfers (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of concurrently running chunk sessions.
pub const DEFAULT_PARALLEL_SESSIONS: usize = 5;

/// User agent sent with every request unless overridden at construction.
pub const DEFAULT_USER_AGENT: &str = concat!("fetchkit/", env!("CARGO_PKG_VERSION"));
