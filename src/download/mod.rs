//! Asynchronous, resumable HTTP download engine.
//!
//! This module provides event-driven file transfers that stream response
//! bodies to disk through an atomically-committed staging file, with
//! interrupted transfers resumable via HTTP range requests.
//!
//! # Features
//!
//! - Non-blocking `start`/`resume`: transfers run on spawned tasks and report
//!   through three optional callback slots (completion, progress, content
//!   length)
//! - Staging files (`<destination>.fetchpart`) renamed into place only on
//!   verified completion; interrupted transfers leave a resumable prefix
//! - Parallel chunked downloads of range-capable resources (5 MiB chunks,
//!   5 concurrent sessions by default) with an on-disk resume manifest
//! - Proxy modes: direct, system default, or a user-specified server with a
//!   bypass list
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use fetchkit::download::{Callbacks, HttpClient, Session};
//!
//! # fn example() {
//! let callbacks = Callbacks::new().on_completion(|report| {
//!     println!("success: {} ({} bytes)", report.success, report.bytes_downloaded);
//! });
//! let session = Session::new(HttpClient::new());
//! session.start(
//!     "https://example.com/file.bin",
//!     Path::new("./file.bin"),
//!     callbacks,
//! );
//! # }
//! ```

mod callbacks;
mod client;
mod constants;
pub mod context;
mod coordinator;
mod error;
mod session;
mod temp_file;

pub use callbacks::{Callbacks, Completion, CompletionFn, ContentLengthFn, ProgressFn};
pub use client::{HttpClient, ProxyConfig, RangeSpec};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_SESSIONS, DEFAULT_USER_AGENT,
    READ_TIMEOUT_SECS,
};
pub use context::{
    CONTENT_LENGTH_UNKNOWN, CONTENT_LENGTH_UNSET, STATUS_FILE_IO, STATUS_INTERRUPTED,
    STATUS_UNAVAILABLE, STATUS_UNSET, TEMP_FILE_SUFFIX, TransferContext, TransferStatus,
    temp_path_for,
};
pub use coordinator::ChunkCoordinator;
pub use error::TransferError;
pub use session::Session;
pub use temp_file::TempFileStore;
