//! The remote side: a minimal [`Transport`] abstraction, enumeration of the
//! remote tree, and the negotiated remote hashing strategy.
//!
//! Session setup (authentication, host keys) belongs to whoever constructs the
//! transport; the engine only issues the five operations below.

pub mod local;
pub mod shell;
pub mod ssh;
pub mod strategy;

pub use local::LocalTransport;
pub use ssh::{SshDestination, SshTransport};
pub use strategy::{HashingStrategy, RemoteHasher};

use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("remote command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {detail}")]
    UnexpectedOutput { command: String, detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Turn a non-zero exit status into [`TransportError::CommandFailed`].
    pub fn check(self, command: &str) -> Result<Self, TransportError> {
        if self.success() {
            Ok(self)
        } else {
            Err(TransportError::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr_lossy(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    /// Permission bits (`st_mode & 0o7777`).
    pub permissions: u32,
}

/// A regular file found under the remote root, split at its last `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RemoteFile {
    pub directory: String,
    pub filename: String,
}

impl RemoteFile {
    /// Split a `/`-separated path at its last separator.
    pub fn from_path(path: &str) -> Option<Self> {
        let (directory, filename) = path.rsplit_once('/')?;
        if filename.is_empty() {
            return None;
        }
        Some(RemoteFile {
            directory: directory.to_string(),
            filename: filename.to_string(),
        })
    }

    pub fn path(&self) -> String {
        join(&self.directory, &self.filename)
    }
}

/// A remote regular file together with the metadata recorded at enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub directory: String,
    pub filename: String,
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub permissions: u32,
}

impl RemoteEntry {
    pub fn new(file: RemoteFile, stat: RemoteStat) -> Self {
        RemoteEntry {
            directory: file.directory,
            filename: file.filename,
            size: stat.size,
            modified: stat.modified,
            accessed: stat.accessed,
            permissions: stat.permissions,
        }
    }

    pub fn path(&self) -> String {
        join(&self.directory, &self.filename)
    }
}

impl fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Join remote path segments with `/`.
pub fn join(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else if directory.ends_with('/') {
        format!("{}{}", directory, name)
    } else {
        format!("{}/{}", directory, name)
    }
}

/// Operations the engine needs from the remote host.
///
/// Paths are absolute, `/`-separated remote paths.
pub trait Transport: Send + Sync {
    fn exec(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Metadata of `path`, or [`TransportError::NotFound`] if it does not exist.
    fn stat(&self, path: &str) -> Result<RemoteStat, TransportError>;

    /// Every regular file below `root`, recursively.
    fn list_regular_files(&self, root: &str) -> Result<Vec<RemoteFile>, TransportError>;

    fn upload(&self, content: &[u8], path: &str) -> Result<(), TransportError>;

    fn remove(&self, path: &str) -> Result<(), TransportError>;

    /// Whether several operations may be in flight at once.
    fn supports_concurrency(&self) -> bool {
        false
    }

    /// Whether remote paths name this machine's own filesystem.
    fn is_local(&self) -> bool {
        false
    }
}

/// List and stat every regular file under `root`, skipping `exclude` (the
/// uploaded hashing helper).
///
/// Entries come back ordered by directory length so parents are handled before
/// their children. Any listing or stat failure is returned as-is: nothing can
/// be matched without the complete remote file list.
pub fn enumerate(
    transport: &dyn Transport,
    root: &str,
    exclude: Option<&str>,
) -> Result<Vec<RemoteEntry>, TransportError> {
    let mut files = transport.list_regular_files(root)?;
    files.sort();
    files.sort_by_key(|f| f.directory.len());

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let path = file.path();
        if exclude == Some(path.as_str()) {
            debug!("Skipping hashing helper {}", path);
            continue;
        }
        let stat = transport.stat(&path)?;
        entries.push(RemoteEntry::new(file, stat));
    }
    Ok(entries)
}
