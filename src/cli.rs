//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fetchkit::ProxyConfig;
use fetchkit::download::{DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_SESSIONS};

/// Download one resource over HTTP(S), resumably.
///
/// Fetchkit streams the response to a staging file and renames it into place
/// only when the byte count checks out; an interrupted run leaves the staging
/// file behind and `--resume` picks up where it stopped. `--chunked` fetches
/// range-capable resources as parallel byte-range chunks.
#[derive(Parser, Debug)]
#[command(name = "fetchkit")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download
    pub url: String,

    /// Output file path (defaults to the last path segment of the URL)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fetch the resource as parallel byte-range chunks
    #[arg(long)]
    pub chunked: bool,

    /// Resume from an existing staging file
    #[arg(long, conflicts_with = "chunked")]
    pub resume: bool,

    /// Chunk size in MiB for --chunked (1-1024)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE / (1024 * 1024), value_parser = clap::value_parser!(u64).range(1..=1024))]
    pub chunk_size: u64,

    /// Maximum concurrent chunk sessions (1-64)
    #[arg(short = 'c', long, default_value_t = DEFAULT_PARALLEL_SESSIONS as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub sessions: u8,

    /// Proxy: "direct", "system", or a proxy URL like http://host:port
    #[arg(long, default_value = "system")]
    pub proxy: String,

    /// Print MD5/SHA-1/SHA-256 digests after a successful download
    #[arg(long)]
    pub digest: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Proxy mode for client construction.
    #[must_use]
    pub fn proxy_config(&self) -> ProxyConfig {
        match self.proxy.as_str() {
            "direct" => ProxyConfig::Direct,
            "system" => ProxyConfig::SystemDefault,
            server => ProxyConfig::UserSpecified {
                server: server.to_owned(),
                bypass: Vec::new(),
            },
        }
    }

    /// Destination path: `--output` if given, otherwise the last non-empty
    /// path segment of the URL.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let name = url::Url::parse(&self.url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(ToOwned::to_owned))
            })
            .filter(|segment| !segment.is_empty());
        PathBuf::from(name.unwrap_or_else(|| "download.bin".to_owned()))
    }
}
