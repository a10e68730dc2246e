//! Blob file storage.
//!
//! Each cached track is a single opaque file `<track_hash>.audio` inside the
//! cache directory. Writes go through a `.part` temp file and only rename
//! into place once the full body has been flushed, so a crash mid-download
//! never leaves a half-written blob under the final name.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

const BLOB_EXTENSION: &str = "audio";
const PARTIAL_SUFFIX: &str = ".part";

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens the store, creating the cache directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final on-disk path for a track's blob.
    pub fn path_for(&self, track_hash: &str) -> PathBuf {
        self.root.join(format!("{track_hash}.{BLOB_EXTENSION}"))
    }

    fn partial_path_for(&self, track_hash: &str) -> PathBuf {
        let mut path = self.path_for(track_hash).into_os_string();
        path.push(PARTIAL_SUFFIX);
        PathBuf::from(path)
    }

    /// Streams `reader` to disk and atomically publishes the blob.
    ///
    /// Returns the final path and byte count. A zero-byte body is rejected
    /// and the partial file removed; any write error likewise cleans up the
    /// partial before propagating.
    pub async fn write(
        &self,
        track_hash: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(PathBuf, u64)> {
        let partial = self.partial_path_for(track_hash);
        let result = self.write_partial(&partial, reader).await;

        let bytes = match result {
            Ok(bytes) if bytes > 0 => bytes,
            Ok(_) => {
                self.remove_partial(track_hash).await;
                return Err(CacheError::EmptyDownload(track_hash.to_string()));
            }
            Err(err) => {
                self.remove_partial(track_hash).await;
                return Err(err);
            }
        };

        let path = self.path_for(track_hash);
        fs::rename(&partial, &path).await?;
        debug!(track_hash, bytes, path = %path.display(), "Blob written");
        Ok((path, bytes))
    }

    async fn write_partial(
        &self,
        partial: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let file = fs::File::create(partial).await?;
        let mut writer = BufWriter::new(file);
        let bytes = tokio::io::copy(reader, &mut writer).await?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(bytes)
    }

    /// Drops a leftover `.part` file, e.g. after a cancelled download.
    /// A missing file is fine; other failures are logged and swallowed.
    pub async fn remove_partial(&self, track_hash: &str) {
        let partial = self.partial_path_for(track_hash);
        if let Err(err) = fs::remove_file(&partial).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(track_hash, error = %err, "Failed to remove partial blob");
            }
        }
    }

    /// True when the blob exists with a non-zero size. A zero-byte file is
    /// treated as missing so corrupt entries self-heal on the next access.
    pub async fn exists(&self, path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    pub async fn size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    pub async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every blob and partial in the cache directory. Returns the
    /// number of files removed; unreadable entries are logged and skipped.
    pub async fn clear(&self) -> Result<u64> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove blob"),
            }
        }
        Ok(removed)
    }
}
