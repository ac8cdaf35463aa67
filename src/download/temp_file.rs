//! Staging file with scoped acquisition and explicit terminal operations.
//!
//! Every transfer writes into `<destination>.fetchpart` and only ever touches
//! the destination path through [`TempFileStore::commit`], an atomic rename
//! performed after all expected bytes are on disk. The store is consumed by
//! exactly one of three terminal calls:
//!
//! - [`commit`](TempFileStore::commit): flush and rename to the destination
//! - [`discard`](TempFileStore::discard): delete; the partial data is not
//!   worth keeping (the server rejected the request)
//! - [`retain`](TempFileStore::retain): flush and close, keeping the file as
//!   the resume point for a later ranged request
//!
//! Dropping a store without a terminal call closes the handle and retains the
//! file, so an aborted transfer is resumable by default.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::context::temp_path_for;
use super::error::TransferError;

/// Append/truncate-capable staging file for one transfer.
#[derive(Debug)]
pub struct TempFileStore {
    writer: BufWriter<File>,
    temp_path: PathBuf,
    destination: PathBuf,
    bytes_written: u64,
}

impl TempFileStore {
    /// Opens the staging file in truncate mode for a fresh transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the file cannot be created.
    pub async fn create(destination: &Path) -> Result<Self, TransferError> {
        let temp_path = temp_path_for(destination);
        let file = File::create(&temp_path)
            .await
            .map_err(|e| TransferError::file_io(temp_path.clone(), e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            temp_path,
            destination: destination.to_path_buf(),
            bytes_written: 0,
        })
    }

    /// Opens the staging file in append mode, continuing a prior run.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the file cannot be opened.
    pub async fn append(destination: &Path) -> Result<Self, TransferError> {
        let temp_path = temp_path_for(destination);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&temp_path)
            .await
            .map_err(|e| TransferError::file_io(temp_path.clone(), e))?;
        let existing = file
            .metadata()
            .await
            .map_err(|e| TransferError::file_io(temp_path.clone(), e))?
            .len();
        Ok(Self {
            writer: BufWriter::new(file),
            temp_path,
            destination: destination.to_path_buf(),
            bytes_written: existing,
        })
    }

    /// Appends a body chunk to the staging file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the write fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), TransferError> {
        self.writer
            .write_all(buf)
            .await
            .map_err(|e| TransferError::file_io(self.temp_path.clone(), e))?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Bytes accepted so far, including any prior run picked up by `append`.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The staging file path.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flushes and atomically promotes the staging file to the destination.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the flush or rename fails; the
    /// staging file is left in place in that case.
    pub async fn commit(mut self) -> Result<PathBuf, TransferError> {
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::file_io(self.temp_path.clone(), e))?;
        drop(self.writer);
        tokio::fs::rename(&self.temp_path, &self.destination)
            .await
            .map_err(|e| TransferError::file_io(self.temp_path.clone(), e))?;
        debug!(path = %self.destination.display(), "staging file committed");
        Ok(self.destination)
    }

    /// Deletes the staging file. Used only when the partial data has no
    /// value (terminal HTTP error).
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the delete fails.
    pub async fn discard(self) -> Result<(), TransferError> {
        drop(self.writer);
        tokio::fs::remove_file(&self.temp_path)
            .await
            .map_err(|e| TransferError::file_io(self.temp_path.clone(), e))?;
        debug!(path = %self.temp_path.display(), "staging file discarded");
        Ok(())
    }

    /// Flushes and closes, deliberately keeping the staging file on disk as
    /// the resume point for a later run.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FileIo`] if the flush fails.
    pub async fn retain(mut self) -> Result<(), TransferError> {
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::file_io(self.temp_path.clone(), e))?;
        debug!(path = %self.temp_path.display(), bytes = self.bytes_written, "staging file retained for resume");
        Ok(())
    }

    /// Size of an existing staging file for a destination, or 0 if absent.
    ///
    /// Callers use this to supply `bytes_already_downloaded` to a resume.
    pub async fn resumable_bytes(destination: &Path) -> u64 {
        tokio::fs::metadata(temp_path_for(destination))
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }
}
