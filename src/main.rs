//! CLI entry point for fetchkit.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use clap::Parser;
use fetchkit::download::{
    Callbacks, ChunkCoordinator, Completion, HttpClient, Session, TempFileStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let client =
        HttpClient::with_proxy(&args.proxy_config()).context("failed to build HTTP client")?;
    let destination = args.destination();
    info!(url = %args.url, destination = %destination.display(), "fetchkit starting");

    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
        )?);
        bar
    };

    let (tx, rx) = oneshot::channel::<Completion>();
    let tx = Mutex::new(Some(tx));
    let callbacks = Callbacks::new()
        .on_completion(move |completion| {
            if let Some(tx) = tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = tx.send(completion.clone());
            }
        })
        .on_content_length({
            let bar = bar.clone();
            move |content_length| {
                if let Ok(length) = u64::try_from(content_length) {
                    bar.set_length(length);
                }
            }
        })
        .on_progress({
            let bar = bar.clone();
            move |bytes_downloaded, _| bar.set_position(bytes_downloaded)
        });

    // The engine object must outlive the transfer so cancellation stays
    // possible; both paths hold it across the completion await.
    let completion = if args.chunked {
        let coordinator = ChunkCoordinator::new(client)
            .with_chunk_size(args.chunk_size * 1024 * 1024)
            .with_concurrency(usize::from(args.sessions));
        if !coordinator.start(&args.url, &destination, callbacks) {
            bail!("transfer rejected");
        }
        rx.await.context("engine exited without a completion report")?
    } else {
        let session = Session::new(client);
        let accepted = if args.resume {
            let prior = TempFileStore::resumable_bytes(&destination).await;
            info!(prior_bytes = prior, "resuming from staging file");
            session.resume(&args.url, &destination, prior, callbacks)
        } else {
            session.start(&args.url, &destination, callbacks)
        };
        if !accepted {
            bail!("transfer rejected");
        }
        rx.await.context("engine exited without a completion report")?
    };

    bar.finish_and_clear();

    if !completion.success {
        warn!(
            status = completion.status_code,
            bytes = completion.bytes_downloaded,
            "download failed"
        );
        if completion.is_retryable() {
            eprintln!("interrupted; rerun with --resume to continue");
        }
        bail!("download failed (status {})", completion.status_code);
    }

    info!(
        bytes = completion.bytes_downloaded,
        status = completion.status_code,
        path = %destination.display(),
        "download complete"
    );
    println!("{}", destination.display());

    if args.digest {
        let digests = fetchkit::digest_file(&destination)
            .await
            .context("failed to digest downloaded file")?;
        println!("md5     {}", digests.md5);
        println!("sha1    {}", digests.sha1);
        println!("sha256  {}", digests.sha256);
    }

    Ok(())
}
