//! Per-transfer state record and the sentinel values of the callback contract.
//!
//! A [`TransferContext`] carries no behavior: it is the single record of what
//! one transfer is doing, owned by the session (or coordinator) driving it.
//! Content length and status code use sentinel-valued integers so that the
//! callback contract can distinguish "not read yet" from "server did not say".

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix appended to the destination path to form the staging file path.
pub const TEMP_FILE_SUFFIX: &str = ".fetchpart";

/// Content length has not been read from a response yet.
pub const CONTENT_LENGTH_UNSET: i64 = -1;

/// The server did not report a usable content length.
pub const CONTENT_LENGTH_UNKNOWN: i64 = -2;

/// Status code has not been read from a response yet.
pub const STATUS_UNSET: i32 = -1;

/// The status code could not be determined (the request never completed).
pub const STATUS_UNAVAILABLE: i32 = -2;

/// The response body ended before the promised content length was reached.
/// Distinct from any real HTTP status; the staged bytes are kept for resume.
pub const STATUS_INTERRUPTED: i32 = -3;

/// The staging file could not be opened or written.
pub const STATUS_FILE_IO: i32 = -4;

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// No transfer has been accepted yet.
    Idle,
    /// The request has been issued; no response headers yet.
    Connecting,
    /// Response headers arrived; status and content length resolved.
    HeadersReceived,
    /// Body bytes are being appended to the staging file.
    Streaming,
    /// The destination file exists and is complete.
    Completed,
    /// Terminal error; any partial data was discarded.
    Failed,
    /// The stream ended early; the staging file is kept as a resume point.
    Interrupted,
}

impl TransferStatus {
    /// True once the transfer can make no further progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

/// State record for one transfer (whole-file or a single byte-range chunk).
///
/// Single-use: once a session has claimed a context it is never reused for a
/// second transfer.
#[derive(Debug, Clone)]
pub struct TransferContext {
    /// Source URL.
    pub url: String,
    /// Final output path.
    pub destination: PathBuf,
    /// Staging file path (`destination` + [`TEMP_FILE_SUFFIX`]).
    pub temp_path: PathBuf,
    /// Sentinel-valued total byte count; see [`CONTENT_LENGTH_UNSET`].
    pub content_length: i64,
    /// Sentinel-valued HTTP status; see [`STATUS_UNSET`].
    pub status_code: i32,
    /// Bytes already on disk from a prior run (resume only).
    pub bytes_previous: u64,
    /// Bytes downloaded by the current run.
    pub bytes_this_session: u64,
    /// Whether the caller supplied a known prior byte count.
    pub is_resumption: bool,
    /// Current lifecycle state.
    pub status: TransferStatus,
}

impl TransferContext {
    /// Creates a context for a fresh transfer.
    #[must_use]
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let temp_path = temp_path_for(&destination);
        Self {
            url: url.into(),
            destination,
            temp_path,
            content_length: CONTENT_LENGTH_UNSET,
            status_code: STATUS_UNSET,
            bytes_previous: 0,
            bytes_this_session: 0,
            is_resumption: false,
            status: TransferStatus::Idle,
        }
    }

    /// Creates a context resuming from `bytes_previous` bytes already on disk.
    #[must_use]
    pub fn resumed(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        bytes_previous: u64,
    ) -> Self {
        let mut context = Self::new(url, destination);
        context.bytes_previous = bytes_previous;
        context.is_resumption = true;
        context
    }

    /// Cumulative bytes downloaded, including any prior run.
    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_previous + self.bytes_this_session
    }
}

/// Returns the staging file path for a destination path.
#[must_use]
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let mut path = OsString::from(destination.as_os_str());
    path.push(TEMP_FILE_SUFFIX);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_appends_suffix() {
        let temp = temp_path_for(Path::new("/downloads/file.bin"));
        assert_eq!(temp, PathBuf::from("/downloads/file.bin.fetchpart"));
    }

    #[test]
    fn test_new_context_starts_idle_with_unset_sentinels() {
        let context = TransferContext::new("https://example.com/f", "/tmp/f");
        assert_eq!(context.status, TransferStatus::Idle);
        assert_eq!(context.content_length, CONTENT_LENGTH_UNSET);
        assert_eq!(context.status_code, STATUS_UNSET);
        assert!(!context.is_resumption);
        assert_eq!(context.bytes_downloaded(), 0);
    }

    #[test]
    fn test_resumed_context_counts_prior_bytes() {
        let mut context = TransferContext::resumed("https://example.com/f", "/tmp/f", 1024);
        assert!(context.is_resumption);
        context.bytes_this_session = 512;
        assert_eq!(context.bytes_downloaded(), 1536);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Interrupted.is_terminal());
        assert!(!TransferStatus::Idle.is_terminal());
        assert!(!TransferStatus::Streaming.is_terminal());
    }
}
