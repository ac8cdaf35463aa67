//! Caller-supplied notification slots.
//!
//! The engine reports everything through three independent, optional
//! callbacks: completion (exactly once per accepted transfer), progress
//! (zero or more times), and content-length-known (at most once). Callbacks
//! are invoked from the transfer task, which may run on any runtime worker
//! thread, so every slot must be `Send + Sync`.

use std::fmt;
use std::path::PathBuf;

use super::context::STATUS_INTERRUPTED;

/// Completion slot signature.
pub type CompletionFn = Box<dyn Fn(&Completion) + Send + Sync>;

/// Progress slot signature: `(cumulative bytes, sentinel-valued content length)`.
pub type ProgressFn = Box<dyn Fn(u64, i64) + Send + Sync>;

/// Content-length slot signature: fires once with the resolved value.
pub type ContentLengthFn = Box<dyn Fn(i64) + Send + Sync>;

/// Final report for one transfer.
///
/// Delivered exactly once per accepted `start`/`resume`, and never for a
/// rejected one. After this the engine relinquishes the transfer entirely.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Whether the destination file now exists and is complete.
    pub success: bool,
    /// HTTP status, or one of the negative sentinels in
    /// [`context`](super::context) when no real status applies.
    pub status_code: i32,
    /// Cumulative bytes downloaded, including any prior run on resume.
    pub bytes_downloaded: u64,
    /// Sentinel-valued total resource length.
    pub content_length: i64,
    /// The destination path the transfer was aimed at.
    pub destination: PathBuf,
}

impl Completion {
    /// True when the failure left a resumable staging file behind, so the
    /// caller may re-issue the transfer with `resume`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !self.success && self.status_code == STATUS_INTERRUPTED
    }
}

/// The three notification slots, each independently optional.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) completion: Option<CompletionFn>,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) content_length: Option<ContentLengthFn>,
}

impl Callbacks {
    /// Creates an empty set (all slots unset).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the completion slot.
    #[must_use]
    pub fn on_completion(mut self, f: impl Fn(&Completion) + Send + Sync + 'static) -> Self {
        self.completion = Some(Box::new(f));
        self
    }

    /// Sets the progress slot.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(u64, i64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Sets the content-length slot.
    #[must_use]
    pub fn on_content_length(mut self, f: impl Fn(i64) + Send + Sync + 'static) -> Self {
        self.content_length = Some(Box::new(f));
        self
    }

    pub(crate) fn notify_completion(&self, completion: &Completion) {
        if let Some(f) = &self.completion {
            f(completion);
        }
    }

    pub(crate) fn notify_progress(&self, bytes_downloaded: u64, content_length: i64) {
        if let Some(f) = &self.progress {
            f(bytes_downloaded, content_length);
        }
    }

    pub(crate) fn notify_content_length(&self, content_length: i64) {
        if let Some(f) = &self.content_length {
            f(content_length);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("completion", &self.completion.is_some())
            .field("progress", &self.progress.is_some())
            .field("content_length", &self.content_length.is_some())
            .finish()
    }
}
