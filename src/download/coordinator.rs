//! Parallel chunked transfers.
//!
//! The [`ChunkCoordinator`] probes a resource with a one-byte ranged request,
//! partitions it into fixed-size chunks, and fetches each chunk through its
//! own [`Session`] into a numbered segment file next to the destination
//! (`<destination>.fetchpart<N>`). At most `concurrency` sessions run at a
//! time; as each settles, the next pending chunk is dispatched. Once every
//! segment is complete the segments are concatenated, length-checked, and
//! atomically renamed into place.
//!
//! A manifest (`<destination>.fetchpart.json`) records the url, total length
//! and chunk size. A later `start` against matching state skips finished
//! segments and resumes partial ones from their on-disk size; a manifest that
//! no longer matches invalidates every prior artifact.
//!
//! Servers that fail the probe, answer it without `206`, or report no total
//! length get the plain whole-file path through a single session. Callers see
//! the same three callback slots either way.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::callbacks::{Callbacks, Completion, CompletionFn};
use super::client::HttpClient;
use super::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_SESSIONS};
use super::context::{
    CONTENT_LENGTH_UNKNOWN, STATUS_FILE_IO, STATUS_INTERRUPTED, TEMP_FILE_SUFFIX, temp_path_for,
};
use super::error::TransferError;
use super::session::Session;
use super::temp_file::TempFileStore;

type SharedProgress = Arc<dyn Fn(u64, i64) + Send + Sync>;

/// Downloads one resource as parallel byte-range chunks.
#[derive(Debug)]
pub struct ChunkCoordinator {
    client: HttpClient,
    chunk_size: u64,
    concurrency: usize,
    claimed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    active: Arc<Mutex<Vec<Arc<Session>>>>,
}

impl ChunkCoordinator {
    /// Creates a coordinator with the default chunk size and concurrency.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_PARALLEL_SESSIONS,
            claimed: AtomicBool::new(false),
            task: Mutex::new(None),
            active: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Overrides the chunk size in bytes. Values below one byte are clamped.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Overrides the number of concurrently running sessions.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Starts (or resumes, driven by on-disk state) a chunked transfer.
    ///
    /// Same contract as [`Session::start`]: single-use, non-blocking, `false`
    /// when the instance has already accepted a transfer. The caller's
    /// callbacks describe the whole resource, never individual chunks.
    #[instrument(skip(self, callbacks), fields(url = %url, destination = %destination.display()))]
    pub fn start(&self, url: &str, destination: &Path, callbacks: Callbacks) -> bool {
        if self.claimed.swap(true, Ordering::SeqCst) {
            debug!(url, "coordinator already in use; rejecting transfer");
            return false;
        }

        let client = self.client.clone();
        let chunk_size = self.chunk_size;
        let concurrency = self.concurrency;
        let active = Arc::clone(&self.active);
        let url = url.to_owned();
        let destination = destination.to_path_buf();
        let handle = tokio::spawn(async move {
            run(
                client,
                chunk_size,
                concurrency,
                url,
                destination,
                callbacks,
                active,
            )
            .await;
        });
        *lock(&self.task) = Some(handle);
        true
    }

    /// Aborts the orchestrator and every in-flight session. Segment files
    /// and the manifest are retained; no completion is delivered. Idempotent.
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        for session in lock(&self.active).drain(..) {
            session.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resume manifest persisted beside the segments. A stored manifest that no
/// longer matches the current request invalidates all prior segments.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ChunkManifest {
    url: String,
    total_length: u64,
    chunk_size: u64,
}

fn segment_path(destination: &Path, index: usize) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(format!("{TEMP_FILE_SUFFIX}{index}"));
    PathBuf::from(path)
}

fn manifest_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(format!("{TEMP_FILE_SUFFIX}.json"));
    PathBuf::from(path)
}

/// Inclusive byte ranges covering `[0, total_length)`.
fn partition(total_length: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total_length {
        let end = start.saturating_add(chunk_size).min(total_length) - 1;
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

fn range_len((start, end): (u64, u64)) -> u64 {
    end - start + 1
}

async fn run(
    client: HttpClient,
    chunk_size: u64,
    concurrency: usize,
    url: String,
    destination: PathBuf,
    callbacks: Callbacks,
    active: Arc<Mutex<Vec<Arc<Session>>>>,
) {
    let total_length = match client.probe(&url).await {
        Ok(probe) if probe.status == 206 => probe.total_length,
        Ok(probe) => {
            debug!(url, status = probe.status, "ranges not honored");
            None
        }
        Err(error) => {
            debug!(url, %error, "probe failed");
            None
        }
    };

    match total_length {
        Some(total) if total > 0 => {
            run_chunked(
                client,
                url,
                destination,
                total,
                chunk_size,
                concurrency,
                callbacks,
                active,
            )
            .await;
        }
        _ => {
            debug!(url, "falling back to whole-file transfer");
            run_whole_file(client, url, destination, callbacks, active).await;
        }
    }
}

/// Whole-file path for servers without usable range support. The caller's
/// callbacks pass straight through to a single session.
async fn run_whole_file(
    client: HttpClient,
    url: String,
    destination: PathBuf,
    callbacks: Callbacks,
    active: Arc<Mutex<Vec<Arc<Session>>>>,
) {
    let (settled_tx, settled_rx) = oneshot::channel();
    let settled_tx = Mutex::new(Some(settled_tx));
    let forward: Option<CompletionFn> = callbacks.completion;
    let callbacks = Callbacks {
        completion: Some(Box::new(move |completion: &Completion| {
            if let Some(forward) = &forward {
                forward(completion);
            }
            if let Some(tx) = lock(&settled_tx).take() {
                let _ = tx.send(());
            }
        })),
        progress: callbacks.progress,
        content_length: callbacks.content_length,
    };

    let prior = TempFileStore::resumable_bytes(&destination).await;
    let session = Arc::new(Session::new(client));
    lock(&active).push(Arc::clone(&session));

    let accepted = if prior > 0 {
        session.resume(&url, &destination, prior, callbacks)
    } else {
        session.start(&url, &destination, callbacks)
    };
    if accepted {
        // Keep the orchestrator alive so cancel() still covers the session.
        let _ = settled_rx.await;
    }
}

#[allow(clippy::too_many_arguments)]
#[allow(clippy::too_many_lines)]
async fn run_chunked(
    client: HttpClient,
    url: String,
    destination: PathBuf,
    total_length: u64,
    chunk_size: u64,
    concurrency: usize,
    callbacks: Callbacks,
    active: Arc<Mutex<Vec<Arc<Session>>>>,
) {
    let ranges = partition(total_length, chunk_size);
    let manifest = ChunkManifest {
        url: url.clone(),
        total_length,
        chunk_size,
    };

    let priors = match prepare_segments(&destination, &manifest, &ranges).await {
        Ok(priors) => priors,
        Err(error) => {
            warn!(url, %error, "segment preparation failed");
            deliver(
                &callbacks.completion,
                &Completion {
                    success: false,
                    status_code: STATUS_FILE_IO,
                    bytes_downloaded: 0,
                    content_length: 0,
                    destination,
                },
            );
            return;
        }
    };

    let total_i64 = i64::try_from(total_length).unwrap_or(CONTENT_LENGTH_UNKNOWN);
    if let Some(content_length) = &callbacks.content_length {
        content_length(total_i64);
    }
    let completion_slot = callbacks.completion;
    let progress: Option<SharedProgress> = callbacks.progress.map(SharedProgress::from);

    // Per-chunk cumulative byte counts, maintained whether or not the caller
    // supplied a progress slot; aggregate progress and failure byte totals
    // are both their sum.
    let counts: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(
        priors
            .iter()
            .map(|prior| match prior {
                SegmentState::Done(len) => *len,
                SegmentState::Partial(bytes) => *bytes,
            })
            .collect(),
    ));

    let mut queue: VecDeque<usize> = priors
        .iter()
        .enumerate()
        .filter(|(_, state)| !matches!(state, SegmentState::Done(_)))
        .map(|(index, _)| index)
        .collect();
    debug!(
        url,
        chunks = ranges.len(),
        pending = queue.len(),
        total_length,
        "chunked transfer planned"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Completion)>();
    let mut in_flight = 0;
    while in_flight < concurrency {
        let Some(index) = queue.pop_front() else { break };
        dispatch_chunk(
            &client,
            &url,
            &destination,
            index,
            ranges[index],
            &priors,
            &counts,
            progress.as_ref(),
            total_i64,
            &tx,
            &active,
        );
        in_flight += 1;
    }

    let mut failure: Option<Completion> = None;
    let mut last_status = 206;
    while in_flight > 0 {
        let Some((index, completion)) = rx.recv().await else {
            break;
        };
        in_flight -= 1;

        if completion.success {
            debug!(url, chunk = index, "chunk complete");
            last_status = completion.status_code;
            if failure.is_none() {
                if let Some(next) = queue.pop_front() {
                    dispatch_chunk(
                        &client,
                        &url,
                        &destination,
                        next,
                        ranges[next],
                        &priors,
                        &counts,
                        progress.as_ref(),
                        total_i64,
                        &tx,
                        &active,
                    );
                    in_flight += 1;
                }
            }
        } else if completion.status_code == STATUS_INTERRUPTED {
            // A dropped connection on one chunk: let the rest settle so
            // their segments stay resumable, then fail the run.
            warn!(url, chunk = index, "chunk interrupted");
            queue.clear();
            failure.get_or_insert(completion);
        } else {
            // The server rejected a range outright. Nothing in flight can
            // produce a usable file; tear the rest down now.
            warn!(
                url,
                chunk = index,
                status = completion.status_code,
                "chunk failed; aborting remaining chunks"
            );
            queue.clear();
            for session in lock(&active).drain(..) {
                session.cancel();
            }
            failure.get_or_insert(completion);
            break;
        }
    }

    if let Some(chunk_failure) = failure {
        let bytes_downloaded = lock(&counts).iter().sum();
        deliver(
            &completion_slot,
            &Completion {
                success: false,
                status_code: chunk_failure.status_code,
                bytes_downloaded,
                content_length: total_i64,
                destination,
            },
        );
        return;
    }

    match reassemble(&destination, &ranges, total_length).await {
        Ok(()) => {
            debug!(url, total_length, "chunked transfer committed");
            deliver(
                &completion_slot,
                &Completion {
                    success: true,
                    status_code: last_status,
                    bytes_downloaded: total_length,
                    content_length: total_i64,
                    destination,
                },
            );
        }
        Err(error) => {
            warn!(url, %error, "reassembly failed");
            deliver(
                &completion_slot,
                &Completion {
                    success: false,
                    status_code: error.status_sentinel(),
                    bytes_downloaded: total_length,
                    content_length: total_i64,
                    destination,
                },
            );
        }
    }
}

fn deliver(slot: &Option<CompletionFn>, completion: &Completion) {
    if let Some(completion_fn) = slot {
        completion_fn(completion);
    }
}

#[derive(Debug, Clone, Copy)]
enum SegmentState {
    /// Segment file fully downloaded by a prior run.
    Done(u64),
    /// Bytes staged so far (possibly zero).
    Partial(u64),
}

/// Reconciles on-disk segment state with the manifest. Matching manifests
/// keep prior segments; anything else wipes the slate and rewrites the
/// manifest.
async fn prepare_segments(
    destination: &Path,
    manifest: &ChunkManifest,
    ranges: &[(u64, u64)],
) -> Result<Vec<SegmentState>, TransferError> {
    let stored = read_manifest(destination).await;
    if stored.as_ref() != Some(manifest) {
        if stored.is_some() {
            debug!(destination = %destination.display(), "manifest mismatch; discarding prior segments");
        }
        clear_chunk_artifacts(destination)
            .await
            .map_err(|e| TransferError::file_io(destination, e))?;
        write_manifest(destination, manifest).await?;
        return Ok(vec![SegmentState::Partial(0); ranges.len()]);
    }

    let mut states = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        let chunk_len = range_len(*range);
        let segment = segment_path(destination, index);
        if let Ok(metadata) = fs::metadata(&segment).await {
            if metadata.len() == chunk_len {
                states.push(SegmentState::Done(chunk_len));
                continue;
            }
            // Wrong-sized committed segment is unusable.
            fs::remove_file(&segment)
                .await
                .map_err(|e| TransferError::file_io(&segment, e))?;
        }
        let staged = TempFileStore::resumable_bytes(&segment).await;
        if staged >= chunk_len {
            // An over-long staging file cannot be a valid prefix.
            let staging = temp_path_for(&segment);
            fs::remove_file(&staging)
                .await
                .map_err(|e| TransferError::file_io(&staging, e))?;
            states.push(SegmentState::Partial(0));
        } else {
            states.push(SegmentState::Partial(staged));
        }
    }
    Ok(states)
}

#[allow(clippy::too_many_arguments)]
fn dispatch_chunk(
    client: &HttpClient,
    url: &str,
    destination: &Path,
    index: usize,
    range: (u64, u64),
    priors: &[SegmentState],
    counts: &Arc<Mutex<Vec<u64>>>,
    progress: Option<&SharedProgress>,
    total_length: i64,
    tx: &mpsc::UnboundedSender<(usize, Completion)>,
    active: &Arc<Mutex<Vec<Arc<Session>>>>,
) {
    let prior = match priors[index] {
        SegmentState::Partial(bytes) => bytes,
        SegmentState::Done(_) => return,
    };

    let chunk_callbacks = Callbacks::new()
        .on_completion({
            let tx = tx.clone();
            move |completion: &Completion| {
                let _ = tx.send((index, completion.clone()));
            }
        })
        .on_progress({
            let counts = Arc::clone(counts);
            let progress = progress.cloned();
            // The counts update runs for every chunk so failure completions
            // can report real byte totals even when nobody listens for
            // progress. The forward happens under the counts lock: two
            // chunks computing sums 10 then 12 must deliver them in that
            // order.
            move |bytes, _| {
                let mut counts = lock(&counts);
                counts[index] = bytes;
                if let Some(progress) = &progress {
                    let sum = counts.iter().sum();
                    progress(sum, total_length);
                }
            }
        });

    let session = Arc::new(Session::new(client.clone()));
    if session.start_chunk(
        url,
        &segment_path(destination, index),
        range,
        prior,
        chunk_callbacks,
    ) {
        lock(active).push(session);
    }
}

/// Concatenates the segments into the destination's staging file, verifies
/// the byte count, and commits. Segment files and the manifest are removed
/// only after the rename.
async fn reassemble(
    destination: &Path,
    ranges: &[(u64, u64)],
    total_length: u64,
) -> Result<(), TransferError> {
    let mut store = TempFileStore::create(destination).await?;
    let mut buffer = vec![0u8; 64 * 1024];
    for index in 0..ranges.len() {
        let path = segment_path(destination, index);
        let mut segment = fs::File::open(&path)
            .await
            .map_err(|e| TransferError::file_io(&path, e))?;
        loop {
            let read = segment
                .read(&mut buffer)
                .await
                .map_err(|e| TransferError::file_io(&path, e))?;
            if read == 0 {
                break;
            }
            store.write(&buffer[..read]).await?;
        }
    }

    if store.bytes_written() != total_length {
        let actual = store.bytes_written();
        store.retain().await?;
        return Err(TransferError::length_mismatch(
            destination,
            total_length,
            actual,
        ));
    }
    store.commit().await?;

    for index in 0..ranges.len() {
        let path = segment_path(destination, index);
        if let Err(error) = fs::remove_file(&path).await {
            warn!(path = %path.display(), %error, "segment cleanup failed");
        }
    }
    let manifest = manifest_path(destination);
    if let Err(error) = fs::remove_file(&manifest).await {
        warn!(path = %manifest.display(), %error, "manifest cleanup failed");
    }
    Ok(())
}

async fn read_manifest(destination: &Path) -> Option<ChunkManifest> {
    let bytes = fs::read(manifest_path(destination)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn write_manifest(destination: &Path, manifest: &ChunkManifest) -> Result<(), TransferError> {
    let path = manifest_path(destination);
    let bytes =
        serde_json::to_vec_pretty(manifest).map_err(|e| TransferError::file_io(&path, e.into()))?;
    fs::write(&path, bytes)
        .await
        .map_err(|e| TransferError::file_io(&path, e))
}

/// Removes every artifact sharing the destination's staging prefix: numbered
/// segments, their staging files, the whole-file staging file, the manifest.
async fn clear_chunk_artifacts(destination: &Path) -> std::io::Result<()> {
    let Some(file_name) = destination.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    let prefix = format!("{file_name}{TEMP_FILE_SUFFIX}");
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut entries = fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix))
        {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
