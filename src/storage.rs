//! # Transient Upload Storage
//!
//! Uploaded audio lives on disk only for the duration of one request. The
//! engine takes a file path, so the upload is streamed into a scratch
//! directory, verified, handed to the engine, and removed again.
//!
//! ## Naming
//! `recording_<YYYYMMDD-HHMMSS>_<8 hex chars>_<sanitized stem>.<ext>`
//!
//! The random component keeps concurrent uploads with the same client
//! filename in the same second apart. The client filename is sanitized before
//! reuse: directory components are dropped and only `[A-Za-z0-9._-]` survive,
//! so `../../etc/passwd` cannot escape the scratch directory.
//!
//! ## Verification
//! A write that returned `Ok` is not trusted on its own. After the file is
//! flushed it is stat'ed again and must exist and be non-empty.

use actix_web::web::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Failures while persisting an upload.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The body grew past the configured limit while streaming
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    /// The client body stream failed (disconnect, malformed multipart)
    #[error("upload stream failed: {0}")]
    Stream(String),

    /// Writing to disk failed
    #[error("{0}")]
    Io(String),

    /// The write reported success but the file is not there
    #[error("File was not saved successfully")]
    Missing,

    /// The write reported success but the file has no content
    #[error("Saved file is empty")]
    Empty,
}

/// A persisted upload waiting for transcription.
///
/// Owns its path: dropping a `TransientFile` deletes the file unless
/// [`TransientStore::discard`] already did. A request future that is dropped
/// mid-flight (client disconnect, timeout) therefore still cleans up.
#[derive(Debug)]
pub struct TransientFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub original_name: String,
    armed: bool,
}

impl TransientFile {
    fn new(path: PathBuf, original_name: &str) -> Self {
        Self {
            path,
            size_bytes: 0,
            original_name: original_name.to_string(),
            armed: true,
        }
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed abandoned temporary file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove abandoned temporary file"
            ),
        }
    }
}

/// Scratch directory for uploads.
#[derive(Debug, Clone)]
pub struct TransientStore {
    dir: PathBuf,
}

impl TransientStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the scratch directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        debug!(dir = %self.dir.display(), "Upload directory ready");
        Ok(())
    }

    /// Stream `body` into a new, uniquely named file.
    ///
    /// Any failure, or dropping the returned future before it completes,
    /// removes whatever was written.
    pub async fn persist<S, E>(
        &self,
        original_name: &str,
        body: S,
        limit: usize,
    ) -> Result<TransientFile, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut file = TransientFile::new(self.dir.join(unique_filename(original_name)), original_name);
        info!(path = %file.path.display(), "Saving upload");

        write_body(&file.path, body, limit).await?;

        file.size_bytes = match fs::metadata(&file.path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => return Err(StorageError::Missing),
        };

        if file.size_bytes == 0 {
            return Err(StorageError::Empty);
        }

        info!(path = %file.path.display(), size_bytes = file.size_bytes, "Upload saved");
        Ok(file)
    }

    /// Delete a transient file. Failures are logged, never returned: by the
    /// time this runs the response has already been decided.
    pub async fn discard(&self, mut file: TransientFile) {
        file.armed = false;
        match fs::remove_file(&file.path).await {
            Ok(()) => info!(path = %file.path.display(), "Cleaned up temporary file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %file.path.display(), "Temporary file already gone")
            }
            Err(e) => error!(
                path = %file.path.display(),
                error = %e,
                "Failed to clean up temporary file"
            ),
        }
    }
}

async fn write_body<S, E>(path: &Path, mut body: S, limit: usize) -> Result<(), StorageError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StorageError::Io(e.to_string()))?;
    let mut written = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StorageError::Stream(e.to_string()))?;
        written += chunk.len();
        if written > limit {
            return Err(StorageError::TooLarge { limit });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
    }

    file.flush().await.map_err(|e| StorageError::Io(e.to_string()))?;
    file.sync_all().await.map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(())
}

/// Lowercased extension of the last path component of a client filename.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = base_name(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    let ext = ext.trim().to_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Reduce a client filename to a safe `stem[.ext]`.
pub fn sanitize_filename(filename: &str) -> String {
    let name = base_name(filename);
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };

    let mut stem = sanitize_component(stem);
    if stem.is_empty() {
        stem = "audio".to_string();
    }

    match ext.map(sanitize_component).filter(|ext| !ext.is_empty()) {
        Some(ext) => format!("{}.{}", stem, ext.to_lowercase()),
        None => stem,
    }
}

fn unique_filename(original_name: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let nonce = Uuid::new_v4().simple().to_string();
    format!("recording_{}_{}_{}", timestamp, &nonce[..8], sanitize_filename(original_name))
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename)
}

fn sanitize_component(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c),
            '.' | '-' | '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}
