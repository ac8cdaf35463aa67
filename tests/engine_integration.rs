//! Integration tests for the download engine.
//!
//! These tests verify full transfer flows with mock HTTP servers: resumable
//! single transfers, the staging-file contract, and chunked parallel
//! downloads. Truncated responses are simulated with a raw TCP listener
//! because the mock server always sends a matching Content-Length.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use fetchkit::download::{
    Callbacks, ChunkCoordinator, Completion, HttpClient, STATUS_INTERRUPTED, Session,
    TempFileStore, temp_path_for,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Callbacks that forward the completion report through a oneshot.
fn capture_completion() -> (Callbacks, oneshot::Receiver<Completion>) {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let callbacks = Callbacks::new().on_completion(move |completion: &Completion| {
        if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(completion.clone());
        }
    });
    (callbacks, rx)
}

/// Serves exactly one connection with a raw, pre-baked HTTP response, then
/// closes the socket. Lets a test promise more bytes than it delivers.
async fn serve_raw_once(response: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no local addr");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}")
}

fn parse_range(spec: &str, total: usize) -> Option<(usize, usize)> {
    let spec = spec.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        total.checked_sub(1)?
    } else {
        end.parse().ok()?
    };
    (start <= end && end < total).then_some((start, end))
}

/// Mock responder with real byte-range support: honors `Range` with 206 and
/// `Content-Range`, serves the whole body on a plain GET, 416 on a range
/// past the end.
struct RangeResponder {
    content: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("Range")
            .and_then(|value| value.to_str().ok());
        match range {
            None => ResponseTemplate::new(200).set_body_bytes(self.content.clone()),
            Some(spec) => match parse_range(spec, self.content.len()) {
                Some((start, end)) => ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.content.len()).as_str(),
                    )
                    .set_body_bytes(self.content[start..=end].to_vec()),
                None => ResponseTemplate::new(416),
            },
        }
    }
}

/// Range responder that answers 500 for the range starting at
/// `poison_start`, and serves every other range normally.
struct FlakyRangeResponder {
    content: Vec<u8>,
    poison_start: usize,
}

impl Respond for FlakyRangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("Range")
            .and_then(|value| value.to_str().ok());
        match range {
            None => ResponseTemplate::new(200).set_body_bytes(self.content.clone()),
            Some(spec) => match parse_range(spec, self.content.len()) {
                Some((start, _)) if start == self.poison_start => ResponseTemplate::new(500),
                Some((start, end)) => ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.content.len()).as_str(),
                    )
                    .set_body_bytes(self.content[start..=end].to_vec()),
                None => ResponseTemplate::new(416),
            },
        }
    }
}

fn test_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
}

fn segment_path(destination: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.fetchpart{index}", destination.display()))
}

fn manifest_path(destination: &Path) -> PathBuf {
    PathBuf::from(format!("{}.fetchpart.json", destination.display()))
}

#[tokio::test]
async fn test_truncated_transfer_resumes_to_identical_file() {
    let content = test_content(24 * 1024);
    let cut = 10 * 1024;

    // Phase 1: a server that promises the full length but closes after `cut`
    // bytes.
    let mut truncated = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content.len()
    )
    .into_bytes();
    truncated.extend_from_slice(&content[..cut]);
    let url = serve_raw_once(truncated).await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("file.bin");

    let (callbacks, rx) = capture_completion();
    let session = Session::new(HttpClient::new());
    assert!(session.start(&url, &destination, callbacks));

    let completion = rx.await.expect("no completion from first run");
    assert!(!completion.success);
    assert_eq!(completion.status_code, STATUS_INTERRUPTED);
    assert!(completion.is_retryable());
    assert!(!destination.exists());

    let prior = TempFileStore::resumable_bytes(&destination).await;
    assert_eq!(prior, cut as u64, "staging file holds the delivered prefix");

    // Phase 2: a well-behaved range server takes over from the same staging
    // file.
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(RangeResponder {
            content: content.clone(),
        })
        .mount(&mock_server)
        .await;

    let observed_lengths = Arc::new(Mutex::new(Vec::new()));
    let lengths = Arc::clone(&observed_lengths);
    let (callbacks, rx) = capture_completion();
    let callbacks = callbacks.on_progress(move |_, content_length| {
        lengths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(content_length);
    });

    let session = Session::new(HttpClient::new());
    assert!(session.resume(
        &format!("{}/file.bin", mock_server.uri()),
        &destination,
        prior,
        callbacks
    ));

    let completion = rx.await.expect("no completion from resume");
    assert!(completion.success, "got {completion:?}");
    assert_eq!(completion.bytes_downloaded, content.len() as u64);

    // The committed file is byte-identical to an uninterrupted download.
    assert_eq!(std::fs::read(&destination).expect("read destination"), content);
    assert!(!temp_path_for(&destination).exists());

    // The unset sentinel is never visible once streaming has begun.
    let observed = observed_lengths
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    assert!(observed.iter().all(|&length| length == content.len() as i64));
}

#[tokio::test]
async fn test_http_error_leaves_no_artifacts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("gone.bin");

    let completions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&completions);
    let (callbacks, rx) = capture_completion();
    let callbacks = callbacks.on_progress(move |bytes, _| {
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes);
    });

    let session = Session::new(HttpClient::new());
    assert!(session.start(
        &format!("{}/gone.bin", mock_server.uri()),
        &destination,
        callbacks
    ));

    let completion = rx.await.expect("no completion");
    assert!(!completion.success);
    assert_eq!(completion.status_code, 404);
    assert_eq!(completion.bytes_downloaded, 0);
    assert_eq!(completion.content_length, 0);

    // No staging file, no destination, no progress reports.
    assert!(!destination.exists());
    assert!(!temp_path_for(&destination).exists());
    assert!(
        completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    );
}

#[tokio::test]
async fn test_chunked_download_reassembles_identical_file() {
    let chunk_size = 5 * 1024;
    let content = test_content(23 * 1024); // 4 full chunks + one 3 KiB tail
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(RangeResponder {
            content: content.clone(),
        })
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("big.bin");

    let lengths = Arc::new(Mutex::new(Vec::new()));
    let progress = Arc::new(Mutex::new(Vec::new()));
    let (callbacks, rx) = capture_completion();
    let callbacks = callbacks
        .on_content_length({
            let lengths = Arc::clone(&lengths);
            move |length| {
                lengths
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(length);
            }
        })
        .on_progress({
            let progress = Arc::clone(&progress);
            move |bytes, _| {
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(bytes);
            }
        });

    let coordinator = ChunkCoordinator::new(HttpClient::new()).with_chunk_size(chunk_size);
    assert!(coordinator.start(
        &format!("{}/big.bin", mock_server.uri()),
        &destination,
        callbacks
    ));

    let completion = rx.await.expect("no completion");
    assert!(completion.success, "got {completion:?}");
    assert_eq!(completion.bytes_downloaded, content.len() as u64);
    assert_eq!(completion.content_length, content.len() as i64);

    assert_eq!(std::fs::read(&destination).expect("read destination"), content);

    // Segments and the manifest are gone after the commit.
    for index in 0..5 {
        assert!(!segment_path(&destination, index).exists());
    }
    assert!(!manifest_path(&destination).exists());
    assert!(!temp_path_for(&destination).exists());

    // One content-length report for the whole resource, monotonic progress.
    assert_eq!(
        *lengths.lock().unwrap_or_else(PoisonError::into_inner),
        vec![content.len() as i64]
    );
    let progress = progress.lock().unwrap_or_else(PoisonError::into_inner);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_aggregate_progress_is_monotonic_across_many_small_chunks() {
    let content = test_content(16 * 1024);
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/many.bin"))
        .respond_with(RangeResponder {
            content: content.clone(),
        })
        .mount(&mock_server)
        .await;
    let url = format!("{}/many.bin", mock_server.uri());
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    // Tiny chunks with high concurrency give interleaved per-chunk reports
    // plenty of chances to arrive out of order.
    for round in 0..5 {
        let destination = temp_dir.path().join(format!("many-{round}.bin"));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let (callbacks, rx) = capture_completion();
        let callbacks = callbacks.on_progress({
            let progress = Arc::clone(&progress);
            move |bytes, _| {
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(bytes);
            }
        });

        let coordinator = ChunkCoordinator::new(HttpClient::new())
            .with_chunk_size(64)
            .with_concurrency(8);
        assert!(coordinator.start(&url, &destination, callbacks));

        let completion = rx.await.expect("no completion");
        assert!(completion.success, "round {round}: got {completion:?}");

        let progress = progress.lock().unwrap_or_else(PoisonError::into_inner);
        for pair in progress.windows(2) {
            assert!(
                pair[0] <= pair[1],
                "round {round}: progress went backwards: {} then {}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(progress.last().copied(), Some(content.len() as u64));
    }
}

#[tokio::test]
async fn test_chunk_failure_reports_downloaded_bytes_without_progress_slot() {
    let chunk_size: usize = 5 * 1024;
    let content = test_content(23 * 1024);
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(FlakyRangeResponder {
            content,
            poison_start: 4 * chunk_size, // last chunk always answers 500
        })
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("big.bin");

    // Completion slot only; concurrency 1 so the first four chunks finish
    // before the poisoned one is even requested.
    let (callbacks, rx) = capture_completion();
    let coordinator = ChunkCoordinator::new(HttpClient::new())
        .with_chunk_size(chunk_size as u64)
        .with_concurrency(1);
    assert!(coordinator.start(
        &format!("{}/big.bin", mock_server.uri()),
        &destination,
        callbacks
    ));

    let completion = rx.await.expect("no completion");
    assert!(!completion.success);
    assert_eq!(completion.status_code, 500);
    assert_eq!(completion.bytes_downloaded, 4 * chunk_size as u64);
}

#[tokio::test]
async fn test_chunked_download_aborts_on_chunk_failure() {
    let chunk_size = 5 * 1024;
    let content = test_content(23 * 1024);
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(FlakyRangeResponder {
            content,
            poison_start: 2 * 5 * 1024, // third chunk always answers 500
        })
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("big.bin");

    let (callbacks, rx) = capture_completion();
    let coordinator = ChunkCoordinator::new(HttpClient::new()).with_chunk_size(chunk_size);
    assert!(coordinator.start(
        &format!("{}/big.bin", mock_server.uri()),
        &destination,
        callbacks
    ));

    let completion = rx.await.expect("no completion");
    assert!(!completion.success);
    assert_eq!(completion.status_code, 500);

    // No destination file; the manifest survives for a later retry.
    assert!(!destination.exists());
    assert!(manifest_path(&destination).exists());
}

#[tokio::test]
async fn test_chunked_resume_skips_finished_segments() {
    let chunk_size: usize = 5 * 1024;
    let content = test_content(23 * 1024);
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(RangeResponder {
            content: content.clone(),
        })
        .mount(&mock_server)
        .await;
    let url = format!("{}/big.bin", mock_server.uri());

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("big.bin");

    // Prior run state: chunk 0 committed, chunk 1 staged halfway.
    std::fs::write(
        manifest_path(&destination),
        format!(
            r#"{{"url":"{url}","total_length":{},"chunk_size":{chunk_size}}}"#,
            content.len()
        ),
    )
    .expect("write manifest");
    std::fs::write(segment_path(&destination, 0), &content[..chunk_size])
        .expect("write finished segment");
    std::fs::write(
        temp_path_for(&segment_path(&destination, 1)),
        &content[chunk_size..chunk_size + 100],
    )
    .expect("write partial staging");

    let (callbacks, rx) = capture_completion();
    let coordinator =
        ChunkCoordinator::new(HttpClient::new()).with_chunk_size(chunk_size as u64);
    assert!(coordinator.start(&url, &destination, callbacks));

    let completion = rx.await.expect("no completion");
    assert!(completion.success, "got {completion:?}");
    assert_eq!(std::fs::read(&destination).expect("read destination"), content);

    // The finished segment was never re-requested; the partial one resumed
    // from its staged offset.
    let requests = mock_server
        .received_requests()
        .await
        .expect("requests recorded");
    let ranges: Vec<String> = requests
        .iter()
        .filter_map(|request| request.headers.get("Range"))
        .filter_map(|value| value.to_str().ok().map(ToOwned::to_owned))
        .collect();
    assert!(!ranges.iter().any(|r| r == "bytes=0-5119"));
    assert!(ranges.iter().any(|r| r == &format!("bytes={}-10239", chunk_size + 100)));
}

#[tokio::test]
async fn test_chunked_falls_back_to_whole_file_without_range_support() {
    let content = b"plain server, no ranges".to_vec();
    let mock_server = MockServer::start().await;
    // Plain 200 regardless of any Range header.
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("plain.bin");

    let (callbacks, rx) = capture_completion();
    let coordinator = ChunkCoordinator::new(HttpClient::new());
    assert!(coordinator.start(
        &format!("{}/plain.bin", mock_server.uri()),
        &destination,
        callbacks
    ));

    let completion = rx.await.expect("no completion");
    assert!(completion.success, "got {completion:?}");
    assert_eq!(std::fs::read(&destination).expect("read destination"), content);
    assert!(!segment_path(&destination, 0).exists());
}

#[tokio::test]
async fn test_coordinator_is_single_use() {
    let content = test_content(1024);
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(RangeResponder { content })
        .mount(&mock_server)
        .await;
    let url = format!("{}/file.bin", mock_server.uri());

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let coordinator = ChunkCoordinator::new(HttpClient::new());

    let (callbacks, rx) = capture_completion();
    assert!(coordinator.start(&url, &temp_dir.path().join("a.bin"), callbacks));

    let (second_callbacks, mut second_rx) = capture_completion();
    assert!(!coordinator.start(&url, &temp_dir.path().join("b.bin"), second_callbacks));

    assert!(rx.await.expect("no completion").success);
    assert!(second_rx.try_recv().is_err());
    assert!(!temp_dir.path().join("b.bin").exists());
}
