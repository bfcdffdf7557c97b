//! Filesystem port and its `tokio::fs` implementation.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Raw file bytes.
pub type FileStream = BoxStream<'static, io::Result<Bytes>>;

/// One regular file of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
}

pub(crate) const PROBE_FILE: &str = ".plughub_probe";

/// The directory operations the backup agent relies on.
pub trait RemoteFs: Send + Sync + 'static {
    /// Regular files directly inside `dir`.
    fn list(&self, dir: &Path) -> impl Future<Output = io::Result<Vec<DirEntry>>> + Send;

    /// Whole content of a small file.
    fn read(&self, path: &Path) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Stream a file through a handle of its own.
    fn open(&self, path: &Path) -> impl Future<Output = io::Result<FileStream>> + Send;

    /// Write `stream` to `path`, returning the number of bytes written.
    fn write_stream(
        &self,
        path: &Path,
        stream: FileStream,
    ) -> impl Future<Output = io::Result<u64>> + Send;

    /// Replace the content of `path`.
    fn write(&self, path: &Path, bytes: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;

    fn remove(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;

    /// Check `dir` is a writable directory and return its canonical path.
    fn probe(&self, dir: &Path) -> impl Future<Output = io::Result<PathBuf>> + Send;
}

/// Local or mounted directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl RemoteFs for LocalFs {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                entries.push(DirEntry {
                    name,
                    size: metadata.len(),
                });
            }
        }
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn open(&self, path: &Path) -> io::Result<FileStream> {
        let file = tokio::fs::File::open(path).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn write_stream(&self, path: &Path, mut stream: FileStream) -> io::Result<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn write(&self, path: &Path, bytes: Vec<u8>) -> io::Result<()> {
        tokio::fs::write(path, bytes).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn probe(&self, dir: &Path) -> io::Result<PathBuf> {
        let metadata = tokio::fs::metadata(dir).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            ));
        }
        let probe = dir.join(PROBE_FILE);
        tokio::fs::write(&probe, b"").await?;
        tokio::fs::remove_file(&probe).await?;
        tokio::fs::canonicalize(dir).await
    }
}
