// dkim-stream – streaming DKIM signer
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Retention of the original message body between reading and emitting.
//!
//! The body must be held until the signature is known, since the signature
//! header precedes it in the output. Small bodies are kept in memory. When a
//! cache directory is configured, a body that grows beyond the threshold is
//! moved to a temporary file in that directory instead.
//!
//! Temporary files are owned through [`TempPath`] and are removed when the
//! owner is dropped, whether the operation succeeded, failed, or was
//! abandoned half-way.

use std::{
    io::{self, Cursor, SeekFrom},
    mem,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tempfile::TempPath;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, BufWriter, ReadBuf},
    task,
};
use tracing::debug;

/// The default size in bytes up to which a body is kept in memory even when a
/// cache directory is configured.
pub const DEFAULT_CACHE_THRESHOLD: usize = 128 * 1024;

const CACHE_FILE_PREFIX: &str = ".dkim-body-";

/// Configuration of the on-disk body cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheConfig {
    /// The directory in which temporary files are created. It must exist and
    /// be writable at the time a file is needed.
    pub dir: PathBuf,
    /// Bodies of up to this many bytes stay in memory.
    pub threshold: usize,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            threshold: DEFAULT_CACHE_THRESHOLD,
        }
    }
}

/// Storage for the original body bytes, in memory or in a cache file.
#[derive(Debug)]
pub enum BodyStore {
    Memory {
        buf: Vec<u8>,
        cache: Option<CacheConfig>,
    },
    File(CacheFile),
}

impl BodyStore {
    /// Creates a store that keeps the body in memory, spilling to disk as
    /// configured in `cache`.
    pub fn new(cache: Option<CacheConfig>) -> Self {
        Self::Memory { buf: vec![], cache }
    }

    /// Whether the body is held in a cache file.
    pub fn using_cache(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        let dir = match self {
            Self::File(file) => return file.write(chunk).await,
            Self::Memory { buf, cache } => {
                buf.extend_from_slice(chunk);
                match cache {
                    Some(cache) if buf.len() > cache.threshold => cache.dir.clone(),
                    _ => return Ok(()),
                }
            }
        };

        let mut file = CacheFile::create(&dir).await?;

        if let Self::Memory { buf, .. } = self {
            let buf = mem::take(buf);
            file.write(&buf).await?;
        }

        *self = Self::File(file);

        Ok(())
    }

    /// Completes writing and returns the retained body, positioned at its
    /// start.
    pub async fn finish(self) -> io::Result<RetainedBody> {
        match self {
            Self::Memory { buf, .. } => Ok(RetainedBody::Memory(Cursor::new(buf))),
            Self::File(file) => file.finish().await,
        }
    }
}

/// A uniquely named temporary file holding the body.
#[derive(Debug)]
pub struct CacheFile {
    writer: BufWriter<File>,
    path: TempPath,
    len: u64,
}

impl CacheFile {
    async fn create(dir: &Path) -> io::Result<Self> {
        let dir = dir.to_owned();

        let (file, path) = task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(CACHE_FILE_PREFIX)
                .tempfile_in(dir)
                .map(|f| f.into_parts())
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        debug!("caching message body in {}", path.display());

        Ok(Self {
            writer: BufWriter::new(File::from_std(file)),
            path,
            len: 0,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self) -> io::Result<RetainedBody> {
        self.writer.flush().await?;

        let mut file = self.writer.into_inner();
        file.seek(SeekFrom::Start(0)).await?;

        debug!("cached {} body bytes in {}", self.len, self.path.display());

        Ok(RetainedBody::File {
            file,
            path: self.path,
        })
    }
}

/// The retained original body, readable from its start.
#[derive(Debug)]
pub enum RetainedBody {
    Memory(Cursor<Vec<u8>>),
    File {
        file: File,
        // removes the file when dropped
        path: TempPath,
    },
}

impl RetainedBody {
    pub fn using_cache(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    #[cfg(test)]
    fn cache_path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File { path, .. } => Some(&**path),
        }
    }
}

impl AsyncRead for RetainedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Self::File { file, .. } => Pin::new(file).poll_read(cx, buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut body: RetainedBody) -> Vec<u8> {
        let mut result = vec![];
        body.read_to_end(&mut result).await.unwrap();
        result
    }

    #[tokio::test]
    async fn memory_store_ok() {
        let mut store = BodyStore::new(None);
        store.write(b"abc").await.unwrap();
        store.write(b"def").await.unwrap();
        assert!(!store.using_cache());

        let body = store.finish().await.unwrap();
        assert!(!body.using_cache());
        assert_eq!(read_all(body).await, b"abcdef");
    }

    #[tokio::test]
    async fn store_spills_beyond_threshold() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = CacheConfig::new(dir.path());
        cache.threshold = 4;

        let mut store = BodyStore::new(Some(cache));
        store.write(b"abc").await.unwrap();
        assert!(!store.using_cache());
        store.write(b"de").await.unwrap();
        assert!(store.using_cache());
        store.write(b"fgh").await.unwrap();

        let body = store.finish().await.unwrap();
        let path = body.cache_path().unwrap().to_owned();
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());

        assert_eq!(read_all(body).await, b"abcdefgh");

        // dropped after reading
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn store_below_threshold_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = BodyStore::new(Some(CacheConfig::new(dir.path())));
        store.write(b"small body").await.unwrap();

        let body = store.finish().await.unwrap();
        assert!(!body.using_cache());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn store_fails_with_missing_dir() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = CacheConfig::new(dir.path().join("does/not/exist"));
        cache.threshold = 0;

        let mut store = BodyStore::new(Some(cache));
        assert!(store.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn dropped_store_removes_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = CacheConfig::new(dir.path());
        cache.threshold = 0;

        let mut store = BodyStore::new(Some(cache));
        store.write(b"abc").await.unwrap();
        assert!(store.using_cache());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(store);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
