#![allow(dead_code)]

use refile_core::hasher::{hash_file, HashAlgorithm};
use refile_core::remote::strategy::algorithms_query;
use refile_core::remote::{
    CommandOutput, LocalTransport, RemoteFile, RemoteStat, Transport, TransportError,
};
use refile_core::RunConfig;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Stands in for a remote host with `python3`: filesystem operations go to
/// the local disk, hashing commands are answered in-process.
pub struct FakeTransport {
    inner: LocalTransport,
    algorithm: HashAlgorithm,
    advertised: Vec<String>,
    fail_uploads: AtomicBool,
    unreadable: Mutex<HashSet<String>>,
    commands: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            inner: LocalTransport::new(),
            algorithm,
            advertised: ["blake2b", "md5", "sha1", "sha224", "sha256", "sha384", "sha512"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fail_uploads: AtomicBool::new(false),
            unreadable: Mutex::new(HashSet::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_advertised(mut self, names: &[&str]) -> Self {
        self.advertised = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_uploads(self) -> Self {
        self.fail_uploads.store(true, Ordering::SeqCst);
        self
    }

    /// Hash commands for `path` exit non-zero.
    pub fn make_unreadable(&self, path: &Path) {
        self.unreadable
            .lock()
            .unwrap()
            .insert(path.to_string_lossy().into_owned());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn answer_hash(&self, command: &str) -> CommandOutput {
        let words = shell_words(command);
        let target = words.last().cloned().unwrap_or_default();
        if words.first().map(String::as_str) != Some("python3")
            || self.unreadable.lock().unwrap().contains(&target)
        {
            return failed(&format!("cannot hash {}", target));
        }
        match hash_file(Path::new(&target), self.algorithm, 4096) {
            Ok(digest) => CommandOutput {
                stdout: format!("{}\n", digest).into_bytes(),
                stderr: Vec::new(),
                status: 0,
            },
            Err(e) => failed(&e.to_string()),
        }
    }
}

fn failed(message: &str) -> CommandOutput {
    CommandOutput {
        stdout: Vec::new(),
        stderr: message.as_bytes().to_vec(),
        status: 1,
    }
}

impl Transport for FakeTransport {
    fn exec(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.commands.lock().unwrap().push(command.to_string());
        if command == algorithms_query() {
            return Ok(CommandOutput {
                stdout: format!("{}\n", self.advertised.join("\n")).into_bytes(),
                stderr: Vec::new(),
                status: 0,
            });
        }
        Ok(self.answer_hash(command))
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        self.inner.stat(path)
    }

    fn list_regular_files(&self, root: &str) -> Result<Vec<RemoteFile>, TransportError> {
        self.inner.list_regular_files(root)
    }

    fn upload(&self, content: &[u8], path: &str) -> Result<(), TransportError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(TransportError::io(
                format!("writing {}", path),
                io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system"),
            ));
        }
        self.inner.upload(content, path)
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        self.inner.remove(path)
    }

    fn supports_concurrency(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// Minimal POSIX word splitting: whitespace, single quotes, backslash escapes.
pub fn shell_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Scratch layout: `<tmp>/local`, `<tmp>/remote`, `<tmp>/out` (not created).
pub struct Scratch {
    pub dir: tempfile::TempDir,
    pub local: PathBuf,
    pub remote: PathBuf,
    pub output: PathBuf,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        let remote = dir.path().join("remote");
        let output = dir.path().join("out");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&remote).unwrap();
        // Canonical so walk paths and configured roots share a prefix.
        let local = fs::canonicalize(local).unwrap();
        let remote = fs::canonicalize(remote).unwrap();
        let output = fs::canonicalize(dir.path()).unwrap().join("out");
        Self {
            dir,
            local,
            remote,
            output,
        }
    }

    pub fn config(&self) -> RunConfig {
        RunConfig {
            local_root: Some(self.local.clone()),
            remote_root: Some(self.remote.to_string_lossy().into_owned()),
            output_root: Some(self.output.clone()),
            workers: 2,
            ..RunConfig::default()
        }
    }
}

pub fn write_file(path: &Path, content: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// `lines` lines of pseudo-random text, deterministic per `seed`.
pub fn random_lines(seed: u64, lines: usize) -> String {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut text = String::new();
    for _ in 0..lines {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        text.push_str(&format!("{:016x}\n", state));
    }
    text
}

pub fn sha1_of(path: &Path) -> String {
    hash_file(path, HashAlgorithm::Sha1, 65536).unwrap()
}

/// Regular files (not symlinks) under `dir`, relative and sorted.
pub fn regular_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir_files(dir)
        .into_iter()
        .map(|p| p.strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

fn walkdir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = entry.file_type().unwrap();
            if file_type.is_dir() {
                files.extend(walkdir_files(&path));
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files
}
