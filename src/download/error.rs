//! Error types for the download engine.
//!
//! Transfer failures never surface as `Err` at the public boundary: the
//! engine folds every failure into the single completion callback. These
//! variants exist for the internal plumbing and for mapping each failure to
//! the status-code sentinel the completion contract reports.

use std::path::PathBuf;

use thiserror::Error;

use super::context::{STATUS_FILE_IO, STATUS_INTERRUPTED, STATUS_UNAVAILABLE};

/// Errors that can occur while driving a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The configured proxy server is not a usable proxy URL.
    #[error("invalid proxy server {server}: {source}")]
    InvalidProxy {
        /// The proxy server string as supplied.
        server: String,
        /// The underlying proxy parse error.
        #[source]
        source: reqwest::Error,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The request never produced a response (DNS, refused connection, TLS).
    #[error("connection failed for {url}: {source}")]
    Connect {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an error status (400-599). Terminal; partial
    /// data is discarded because the server rejected the request outright.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The body ended before the promised length was reached. The staged
    /// bytes are a valid prefix and are kept for a later resume.
    #[error("response for {url} ended after {bytes_downloaded} of {content_length} bytes")]
    Interrupted {
        /// The URL whose stream ended early.
        url: String,
        /// Cumulative bytes on disk when the stream ended.
        bytes_downloaded: u64,
        /// The promised total (sentinel-valued).
        content_length: i64,
    },

    /// The staging file could not be opened, written, or promoted.
    #[error("IO error on {path}: {source}")]
    FileIo {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The reassembled file does not add up to the probed resource length.
    #[error("reassembled {path} is {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// The reassembled file path.
        path: PathBuf,
        /// Expected size in bytes.
        expected: u64,
        /// Actual size in bytes.
        actual: u64,
    },
}

impl TransferError {
    /// Creates a client construction error.
    pub fn client_build(source: reqwest::Error) -> Self {
        Self::ClientBuild { source }
    }

    /// Creates an invalid-proxy error.
    pub fn invalid_proxy(server: impl Into<String>, source: reqwest::Error) -> Self {
        Self::InvalidProxy {
            server: server.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a connect failure.
    pub fn connect(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Connect {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP error-status failure.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an interrupted-response failure.
    pub fn interrupted(
        url: impl Into<String>,
        bytes_downloaded: u64,
        content_length: i64,
    ) -> Self {
        Self::Interrupted {
            url: url.into(),
            bytes_downloaded,
            content_length,
        }
    }

    /// Creates a file IO failure.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Creates a reassembly length mismatch failure.
    pub fn length_mismatch(path: impl Into<PathBuf>, expected: u64, actual: u64) -> Self {
        Self::LengthMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// The status-code sentinel this failure reports through completion.
    ///
    /// A real HTTP error status passes through unchanged; everything else
    /// maps to one of the distinguished negative sentinels.
    #[must_use]
    pub fn status_sentinel(&self) -> i32 {
        match self {
            Self::HttpStatus { status, .. } => i32::from(*status),
            Self::Interrupted { .. } => STATUS_INTERRUPTED,
            Self::FileIo { .. } | Self::LengthMismatch { .. } => STATUS_FILE_IO,
            Self::ClientBuild { .. }
            | Self::InvalidProxy { .. }
            | Self::InvalidUrl { .. }
            | Self::Connect { .. } => STATUS_UNAVAILABLE,
        }
    }
}
