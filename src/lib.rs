//! Fetchkit Core Library
//!
//! This library provides an asynchronous, resumable HTTP download engine:
//! single transfers stream to a staging file that is atomically renamed into
//! place on success, interrupted transfers resume via range requests, and
//! range-capable resources can be fetched as parallel chunks.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Transfer sessions, chunk coordination, staging files
//! - [`digest`] - MD5/SHA-1/SHA-256 fingerprinting of completed files

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod digest;
pub mod download;

// Re-export commonly used types
pub use digest::{FileDigests, digest_file};
pub use download::{
    Callbacks, ChunkCoordinator, Completion, DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_SESSIONS,
    HttpClient, ProxyConfig, Session, TempFileStore, TransferError, TransferStatus,
};
