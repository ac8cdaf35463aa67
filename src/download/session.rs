//! Single-transfer state machine.
//!
//! A [`Session`] owns one request/response cycle for one transfer (a whole
//! file, or one byte-range chunk on behalf of the coordinator). It is driven
//! entirely by network completion events: each poll of the response body
//! stream is one event, and the session reacts by appending to the staging
//! file, reporting progress, or settling into a terminal state. `start` and
//! `resume` never block the caller; they spawn the transfer task and return.
//!
//! Terminal outcomes follow the retention rules of the staging store:
//!
//! - clean end of stream at the promised length: commit, success completion
//! - HTTP error status (400-599): staging file deleted, failure completion
//!   with the real status (the server rejected the request; nothing on disk
//!   is worth resuming)
//! - stream ends or errors mid-body: staging file retained, failure
//!   completion with [`STATUS_INTERRUPTED`] so the caller can `resume`
//!
//! A session is single-use. Once it has accepted a transfer, `start` and
//! `resume` return `false` without side effects; the caller creates a new
//! session for the next transfer.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::callbacks::{Callbacks, Completion};
use super::client::{HttpClient, RangeSpec, header_content_length};
use super::context::{
    CONTENT_LENGTH_UNKNOWN, STATUS_FILE_IO, STATUS_INTERRUPTED, TransferContext, TransferStatus,
};
use super::error::TransferError;
use super::temp_file::TempFileStore;

type SharedState = Arc<Mutex<TransferStatus>>;

/// One asynchronous, resumable transfer.
#[derive(Debug)]
pub struct Session {
    client: HttpClient,
    claimed: AtomicBool,
    state: SharedState,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Creates an idle session using the given client.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            claimed: AtomicBool::new(false),
            state: Arc::new(Mutex::new(TransferStatus::Idle)),
            task: Mutex::new(None),
        }
    }

    /// Starts a fresh transfer, truncating any stale staging file.
    ///
    /// Returns `false` without any state change or callback if this session
    /// has already accepted a transfer. Must be called within a tokio
    /// runtime; the transfer runs on its own task and this returns
    /// immediately.
    #[instrument(skip(self, callbacks), fields(url = %url, destination = %destination.display()))]
    pub fn start(&self, url: &str, destination: &Path, callbacks: Callbacks) -> bool {
        self.launch(url, destination, 0, false, None, callbacks)
    }

    /// Resumes a transfer with `Range: bytes=<offset>-`, appending to the
    /// existing staging file.
    ///
    /// `bytes_already_downloaded` is the prior run's byte count, typically
    /// [`TempFileStore::resumable_bytes`]. Same guard and non-blocking
    /// contract as [`start`](Self::start).
    #[instrument(skip(self, callbacks), fields(url = %url, destination = %destination.display()))]
    pub fn resume(
        &self,
        url: &str,
        destination: &Path,
        bytes_already_downloaded: u64,
        callbacks: Callbacks,
    ) -> bool {
        self.launch(
            url,
            destination,
            bytes_already_downloaded,
            true,
            None,
            callbacks,
        )
    }

    /// Fetches one bounded byte range on behalf of the chunk coordinator.
    /// `bytes_previous` resumes within the chunk.
    pub(crate) fn start_chunk(
        &self,
        url: &str,
        destination: &Path,
        range: (u64, u64),
        bytes_previous: u64,
        callbacks: Callbacks,
    ) -> bool {
        self.launch(
            url,
            destination,
            bytes_previous,
            bytes_previous > 0,
            Some(range),
            callbacks,
        )
    }

    fn launch(
        &self,
        url: &str,
        destination: &Path,
        bytes_previous: u64,
        resume: bool,
        chunk_range: Option<(u64, u64)>,
        callbacks: Callbacks,
    ) -> bool {
        // Single-use guard: the first caller claims the session for good.
        if self.claimed.swap(true, Ordering::SeqCst) {
            debug!(url, "session already in use; rejecting transfer");
            return false;
        }

        let mut context = if resume {
            TransferContext::resumed(url, destination, bytes_previous)
        } else {
            TransferContext::new(url, destination)
        };
        context.status = TransferStatus::Connecting;
        set_state(&self.state, TransferStatus::Connecting);

        let client = self.client.clone();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            run_transfer(client, context, chunk_range, callbacks, state).await;
        });
        *lock(&self.task) = Some(handle);
        true
    }

    /// Aborts the transfer, closing the network connection and releasing the
    /// staging file handle. The staging file is retained; no completion is
    /// delivered for a cancelled transfer. Idempotent.
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            let mut state = lock(&self.state);
            if !state.is_terminal() {
                *state = TransferStatus::Interrupted;
            }
        }
    }

    /// Current lifecycle state. Terminal by the time completion is observed.
    #[must_use]
    pub fn state(&self) -> TransferStatus {
        *lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(state: &SharedState, status: TransferStatus) {
    *lock(state) = status;
}

/// Records the terminal state, then delivers the one completion report.
/// Order matters: observers that react to completion must see a settled
/// session.
fn finish(
    state: &SharedState,
    callbacks: &Callbacks,
    status: TransferStatus,
    completion: &Completion,
) {
    set_state(state, status);
    callbacks.notify_completion(completion);
}

// Failures before any body byte arrived report zero counts; once streaming
// has begun the report carries the real cumulative totals.
fn failure(context: &TransferContext, status_code: i32) -> Completion {
    let streaming = context.status == TransferStatus::Streaming;
    Completion {
        success: false,
        status_code,
        bytes_downloaded: if streaming {
            context.bytes_downloaded()
        } else {
            0
        },
        content_length: if streaming { context.content_length } else { 0 },
        destination: context.destination.clone(),
    }
}

/// Drives one transfer to a terminal state. Every exit path settles the
/// shared state and fires completion exactly once.
async fn run_transfer(
    client: HttpClient,
    mut context: TransferContext,
    chunk_range: Option<(u64, u64)>,
    callbacks: Callbacks,
    state: SharedState,
) {
    // Stage first: a transfer that cannot stage bytes must not hit the
    // network at all.
    let mut store = match open_store(&context).await {
        Ok(store) => store,
        Err(error) => {
            warn!(url = %context.url, %error, "staging file unavailable");
            context.status = TransferStatus::Failed;
            finish(
                &state,
                &callbacks,
                TransferStatus::Failed,
                &failure(&context, STATUS_FILE_IO),
            );
            return;
        }
    };

    let range = request_range(&context, chunk_range);
    let response = match client.get(&context.url, range).await {
        Ok(response) => response,
        Err(error) => {
            warn!(url = %context.url, %error, "request failed before headers");
            // A fresh start only truncated an empty staging file; a resume
            // still holds prior data worth keeping.
            let cleanup = if context.is_resumption {
                store.retain().await
            } else {
                store.discard().await
            };
            if let Err(cleanup_error) = cleanup {
                warn!(url = %context.url, %cleanup_error, "staging cleanup failed");
            }
            context.status = TransferStatus::Failed;
            finish(
                &state,
                &callbacks,
                TransferStatus::Failed,
                &failure(&context, error.status_sentinel()),
            );
            return;
        }
    };

    context.status = TransferStatus::HeadersReceived;
    set_state(&state, TransferStatus::HeadersReceived);

    let status = response.status().as_u16();
    context.status_code = i32::from(status);

    // Server honored no range on a resume: restart the staging file from
    // scratch, the full body is coming.
    if context.is_resumption && status != 206 && (200..400).contains(&status) {
        debug!(url = %context.url, status, "server ignored range; restarting from zero");
        context.bytes_previous = 0;
        context.is_resumption = false;
        store = match TempFileStore::create(&context.destination).await {
            Ok(store) => store,
            Err(error) => {
                warn!(url = %context.url, %error, "staging file unavailable");
                context.status = TransferStatus::Failed;
                finish(
                    &state,
                    &callbacks,
                    TransferStatus::Failed,
                    &failure(&context, STATUS_FILE_IO),
                );
                return;
            }
        };
    }

    // Content length resolves exactly once per transfer; after this the
    // unset sentinel is never observable again.
    context.content_length = resolve_content_length(
        status,
        header_content_length(&response),
        context.bytes_previous,
    );
    callbacks.notify_content_length(context.content_length);

    if (400..=599).contains(&status) {
        debug!(url = %context.url, status, "terminal HTTP error status");
        // The server rejected the request; partial data is not resumable.
        if let Err(cleanup_error) = store.discard().await {
            warn!(url = %context.url, %cleanup_error, "staging cleanup failed");
        }
        context.status = TransferStatus::Failed;
        finish(
            &state,
            &callbacks,
            TransferStatus::Failed,
            &failure(&context, i32::from(status)),
        );
        return;
    }

    context.status = TransferStatus::Streaming;
    set_state(&state, TransferStatus::Streaming);

    let mut stream = response.bytes_stream();
    loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                if let Err(error) = store.write(&chunk).await {
                    warn!(url = %context.url, %error, "staging write failed");
                    // The bytes already on disk are a valid prefix.
                    if let Err(cleanup_error) = store.retain().await {
                        warn!(url = %context.url, %cleanup_error, "staging retain failed");
                    }
                    context.status = TransferStatus::Failed;
                    finish(
                        &state,
                        &callbacks,
                        TransferStatus::Failed,
                        &failure(&context, STATUS_FILE_IO),
                    );
                    return;
                }
                context.bytes_this_session += chunk.len() as u64;
                callbacks.notify_progress(context.bytes_downloaded(), context.content_length);
            }
            Some(Err(error)) => {
                // Connection died mid-body. Keep the staged bytes for resume
                // rather than stalling silently.
                warn!(url = %context.url, %error, bytes = context.bytes_downloaded(), "stream error mid-body");
                settle_interrupted(store, &mut context, &callbacks, &state).await;
                return;
            }
            None => break,
        }
    }

    let bytes = context.bytes_downloaded();
    let complete = context.content_length == CONTENT_LENGTH_UNKNOWN
        || i64::try_from(bytes) == Ok(context.content_length);

    if complete {
        match store.commit().await {
            Ok(_) => {
                debug!(url = %context.url, bytes, "transfer completed");
                context.status = TransferStatus::Completed;
                finish(
                    &state,
                    &callbacks,
                    TransferStatus::Completed,
                    &Completion {
                        success: true,
                        status_code: context.status_code,
                        bytes_downloaded: bytes,
                        content_length: context.content_length,
                        destination: context.destination.clone(),
                    },
                );
            }
            Err(error) => {
                warn!(url = %context.url, %error, "commit failed");
                context.status = TransferStatus::Failed;
                finish(
                    &state,
                    &callbacks,
                    TransferStatus::Failed,
                    &failure(&context, STATUS_FILE_IO),
                );
            }
        }
    } else {
        // Fewer bytes than promised with no error status: an interrupted
        // response. The staging file is the resume point for the next run.
        debug!(
            url = %context.url,
            bytes,
            expected = context.content_length,
            "response ended early"
        );
        settle_interrupted(store, &mut context, &callbacks, &state).await;
    }
}

async fn settle_interrupted(
    store: TempFileStore,
    context: &mut TransferContext,
    callbacks: &Callbacks,
    state: &SharedState,
) {
    if let Err(cleanup_error) = store.retain().await {
        warn!(url = %context.url, %cleanup_error, "staging retain failed");
    }
    context.status = TransferStatus::Interrupted;
    finish(
        state,
        callbacks,
        TransferStatus::Interrupted,
        &Completion {
            success: false,
            status_code: STATUS_INTERRUPTED,
            bytes_downloaded: context.bytes_downloaded(),
            content_length: context.content_length,
            destination: context.destination.clone(),
        },
    );
}

async fn open_store(context: &TransferContext) -> Result<TempFileStore, TransferError> {
    if context.is_resumption {
        TempFileStore::append(&context.destination).await
    } else {
        TempFileStore::create(&context.destination).await
    }
}

fn request_range(context: &TransferContext, chunk_range: Option<(u64, u64)>) -> Option<RangeSpec> {
    match chunk_range {
        Some((start, end)) => Some(RangeSpec::Bounded(start + context.bytes_previous, end)),
        None if context.is_resumption => Some(RangeSpec::From(context.bytes_previous)),
        None => None,
    }
}

/// Total resource length as the sentinel-valued contract reports it.
///
/// A 206 body only carries the remaining byte count, so the prior bytes are
/// added back to keep progress and completion math cumulative.
fn resolve_content_length(status: u16, header_length: Option<u64>, bytes_previous: u64) -> i64 {
    let total = if status == 206 {
        header_length.map(|remaining| bytes_previous + remaining)
    } else {
        header_length
    };
    match total {
        Some(total) => i64::try_from(total).unwrap_or(CONTENT_LENGTH_UNKNOWN),
        None => CONTENT_LENGTH_UNKNOWN,
    }
}
