//! [`RemoteFs`] over SFTP.
//!
//! libssh2 is blocking, so every operation runs on the blocking pool with a
//! session of its own. A long download never holds up a listing.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use ssh2::{Session, Sftp};
use tokio::sync::{mpsc, oneshot};

use crate::fs::{DirEntry, FileStream, PROBE_FILE, RemoteFs};

pub const DEFAULT_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_SIZE: usize = 64 * 1024;

/// How the SSH user proves its identity.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    /// PEM encoded private key.
    PrivateKey {
        pem: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(..)"),
            Self::PrivateKey { .. } => f.write_str("PrivateKey(..)"),
        }
    }
}

/// SSH server and account holding the backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("cannot reach {host}:{port}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("ssh handshake failed")]
    Handshake(#[source] ssh2::Error),
    #[error("authentication rejected for {0}")]
    Auth(String),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Sftp(#[from] ssh2::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<SshError> for io::Error {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Sftp(err) => err.into(),
            SshError::Io(err) => err,
            SshError::Connect { ref source, .. } => io::Error::new(source.kind(), err),
            SshError::Auth(_) => io::Error::new(io::ErrorKind::PermissionDenied, err),
            SshError::NotADirectory(_) => io::Error::new(io::ErrorKind::NotADirectory, err),
            SshError::Handshake(_) => io::Error::new(io::ErrorKind::ConnectionAborted, err),
        }
    }
}

impl SshTarget {
    fn tcp(&self) -> Result<TcpStream, SshError> {
        let connect_error = |source: io::Error| SshError::Connect {
            host: self.host.clone(),
            port: self.port,
            source,
        };
        let mut last = io::Error::new(io::ErrorKind::NotFound, "host has no address");
        for addr in (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(connect_error)?
        {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(err) => last = err,
            }
        }
        Err(connect_error(last))
    }

    /// Open an authenticated SFTP session. Blocking.
    fn connect(&self) -> Result<Sftp, SshError> {
        let tcp = self.tcp()?;
        let mut session = Session::new().map_err(SshError::Handshake)?;
        session.set_timeout(u32::try_from(SESSION_TIMEOUT.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(SshError::Handshake)?;

        let auth = match &self.auth {
            SshAuth::Password(password) => session.userauth_password(&self.username, password),
            SshAuth::PrivateKey { pem, passphrase } => {
                session.userauth_pubkey_memory(&self.username, None, pem, passphrase.as_deref())
            }
        };
        if let Err(err) = auth {
            tracing::debug!(host = %self.host, username = %self.username, error = %err, "ssh authentication failed");
            return Err(SshError::Auth(self.username.clone()));
        }
        if !session.authenticated() {
            return Err(SshError::Auth(self.username.clone()));
        }
        Ok(session.sftp()?)
    }
}

/// A directory on an SSH server.
#[derive(Debug, Clone)]
pub struct SftpFs {
    target: Arc<SshTarget>,
}

impl SftpFs {
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        Self {
            target: Arc::new(target),
        }
    }

    #[must_use]
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Run `op` against a fresh session on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, SshError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, SshError> + Send + 'static,
    {
        let target = Arc::clone(&self.target);
        tokio::task::spawn_blocking(move || op(&target.connect()?))
            .await
            .map_err(|err| SshError::Io(io::Error::other(err)))?
    }

    /// Log in and check `dir` is a writable directory. Returns its canonical
    /// path.
    ///
    /// # Errors
    ///
    /// Keeps connection, authentication and location failures apart so a
    /// flow can report each one.
    pub async fn check_location(&self, dir: &Path) -> Result<PathBuf, SshError> {
        let dir = dir.to_path_buf();
        self.run(move |sftp| {
            if !sftp.stat(&dir)?.is_dir() {
                return Err(SshError::NotADirectory(dir));
            }
            let marker = dir.join(PROBE_FILE);
            drop(sftp.create(&marker)?);
            sftp.unlink(&marker)?;
            Ok(sftp.realpath(&dir)?)
        })
        .await
    }
}

impl RemoteFs for SftpFs {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let dir = dir.to_path_buf();
        let entries = self
            .run(move |sftp| {
                let entries = sftp
                    .readdir(&dir)?
                    .into_iter()
                    .filter(|(_, stat)| stat.is_file())
                    .filter_map(|(path, stat)| {
                        let name = path.file_name()?.to_str()?.to_string();
                        Some(DirEntry {
                            name,
                            size: stat.size.unwrap_or(0),
                        })
                    })
                    .collect();
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = path.to_path_buf();
        let bytes = self
            .run(move |sftp| {
                let mut bytes = Vec::new();
                sftp.open(&path)?.read_to_end(&mut bytes)?;
                Ok(bytes)
            })
            .await?;
        Ok(bytes)
    }

    async fn open(&self, path: &Path) -> io::Result<FileStream> {
        let (chunks, receiver) = mpsc::channel::<io::Result<Bytes>>(4);
        let (opened, on_open) = oneshot::channel::<io::Result<()>>();
        let target = Arc::clone(&self.target);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = target
                .connect()
                .and_then(|sftp| Ok(sftp.open(&path)?));
            let mut file = match file {
                Ok(file) => {
                    let _ = opened.send(Ok(()));
                    file
                }
                Err(err) => {
                    let _ = opened.send(Err(err.into()));
                    return;
                }
            };
            let mut buffer = vec![0; CHUNK_SIZE];
            loop {
                let chunk = match file.read(&mut buffer) {
                    Ok(0) => return,
                    Ok(read) => Ok(Bytes::copy_from_slice(&buffer[..read])),
                    Err(err) => Err(err),
                };
                let failed = chunk.is_err();
                // the reader went away
                if chunks.blocking_send(chunk).is_err() || failed {
                    return;
                }
            }
        });
        on_open.await.map_err(io::Error::other)??;
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });
        Ok(stream.boxed())
    }

    async fn write_stream(&self, path: &Path, mut stream: FileStream) -> io::Result<u64> {
        let (chunks, mut receiver) = mpsc::channel::<Bytes>(4);
        let target = Arc::clone(&self.target);
        let path = path.to_path_buf();
        let writer = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let sftp = target.connect()?;
            let mut file = sftp.create(&path)?;
            let mut written = 0u64;
            while let Some(chunk) = receiver.blocking_recv() {
                file.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            file.flush()?;
            Ok(written)
        });

        let mut failed = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    // the writer stopped, its error is returned below
                    if chunks.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        drop(chunks);
        let written = writer.await.map_err(io::Error::other)?;
        match failed {
            Some(err) => Err(err),
            None => written,
        }
    }

    async fn write(&self, path: &Path, bytes: Vec<u8>) -> io::Result<()> {
        let path = path.to_path_buf();
        self.run(move |sftp| {
            let mut file = sftp.create(&path)?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let path = path.to_path_buf();
        self.run(move |sftp| Ok(sftp.unlink(&path)?)).await?;
        Ok(())
    }

    async fn probe(&self, dir: &Path) -> io::Result<PathBuf> {
        Ok(self.check_location(dir).await?)
    }
}
