use super::shell::quote;
use super::{join, Transport, TransportError};
use crate::error::Error;
use crate::hasher::{stream, HashAlgorithm};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interpreter used on the remote host for both hashing modes.
pub const REMOTE_INTERPRETER: &str = "python3";

const HELPER_STEM: &str = "hash";
const HELPER_EXTENSION: &str = "py";
const MAX_HELPER_PROBES: usize = 1000;

/// How remote files get hashed for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashingStrategy {
    /// A helper script was uploaded to this remote path; each hash invokes it.
    ScriptBased(String),
    /// No helper could be installed; each hash sends the whole hashing program.
    CommandLine,
}

/// Remote-side counterpart of [`stream::hash_file`].
pub struct RemoteHasher {
    transport: Arc<dyn Transport>,
    algorithm: HashAlgorithm,
    chunk_size: usize,
    strategy: HashingStrategy,
    program: String,
}

impl RemoteHasher {
    /// Check that the remote supports `algorithm`, then try to install the
    /// helper under `remote_root`, falling back to command-line hashing.
    ///
    /// An unsupported algorithm is a configuration error; a failed algorithm
    /// query is a transport error. Failing to install the helper is not an
    /// error at all.
    pub fn negotiate(
        transport: Arc<dyn Transport>,
        remote_root: &str,
        algorithm: HashAlgorithm,
        chunk_size: usize,
    ) -> Result<Self, Error> {
        let remote = remote_algorithms(transport.as_ref())?;
        debug!("Remote supports hash functions: {:?}", remote);
        if !remote.contains(algorithm.name()) {
            let common: Vec<&str> = HashAlgorithm::local_names()
                .into_iter()
                .filter(|name| remote.contains(*name))
                .collect();
            return Err(Error::Config(format!(
                "Remote server does not support {}. Hash functions supported by both machines are: {}",
                algorithm,
                if common.is_empty() { "(none)".to_string() } else { common.join(", ") }
            )));
        }

        let program = helper_program(algorithm, chunk_size);
        let strategy = match install_helper(transport.as_ref(), remote_root, algorithm, &program) {
            Some(path) => {
                info!("Using uploaded hashing helper {}", path);
                HashingStrategy::ScriptBased(path)
            }
            None => {
                warn!("Could not install a hashing helper on the remote; hashing with one-shot commands");
                HashingStrategy::CommandLine
            }
        };

        Ok(Self {
            transport,
            algorithm,
            chunk_size,
            strategy,
            program,
        })
    }

    pub fn strategy(&self) -> &HashingStrategy {
        &self.strategy
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn supports_concurrency(&self) -> bool {
        self.transport.supports_concurrency()
    }

    pub fn helper_path(&self) -> Option<&str> {
        match &self.strategy {
            HashingStrategy::ScriptBased(path) => Some(path),
            HashingStrategy::CommandLine => None,
        }
    }

    /// Hex digest of the remote file at `remote_path`.
    pub fn hash(&self, remote_path: &str) -> Result<String, TransportError> {
        let command = match &self.strategy {
            HashingStrategy::ScriptBased(script) => script_command(script, remote_path),
            HashingStrategy::CommandLine => inline_command(&self.program, remote_path),
        };
        run_hash_command(self.transport.as_ref(), &command, self.algorithm)
    }

    /// Remove the uploaded helper, if any, and switch to command-line hashing.
    pub fn cleanup(&mut self) -> Result<(), TransportError> {
        if let HashingStrategy::ScriptBased(path) = &self.strategy {
            let path = path.clone();
            self.strategy = HashingStrategy::CommandLine;
            self.transport.remove(&path)?;
            debug!("Removed hashing helper {}", path);
        }
        Ok(())
    }
}

/// Command printing every algorithm the remote interpreter offers, one per line.
pub fn algorithms_query() -> String {
    format!(
        "{} -c {}",
        REMOTE_INTERPRETER,
        quote("import hashlib; print('\\n'.join(sorted(hashlib.algorithms_available)))")
    )
}

pub fn remote_algorithms(transport: &dyn Transport) -> Result<BTreeSet<String>, TransportError> {
    let command = algorithms_query();
    let output = transport.exec(&command)?.check(&command)?;
    let names: BTreeSet<String> = output
        .stdout_lossy()
        .lines()
        .map(|line| line.trim().to_ascii_lowercase())
        .filter(|line| !line.is_empty())
        .collect();
    if names.is_empty() {
        return Err(TransportError::UnexpectedOutput {
            command,
            detail: "no hash functions listed".to_string(),
        });
    }
    Ok(names)
}

/// Source of the hashing helper: one argument in, one hex line out.
///
/// Reads in `chunk_size` pieces in the same order as the local hasher.
pub fn helper_program(algorithm: HashAlgorithm, chunk_size: usize) -> String {
    format!(
        "import hashlib
import sys

hasher = hashlib.new('{}')
with open(sys.argv[1], 'rb') as file:
    while True:
        data = file.read({})
        if not data:
            break
        hasher.update(data)
print(hasher.hexdigest())
",
        algorithm.name(),
        chunk_size
    )
}

pub fn script_command(script: &str, remote_path: &str) -> String {
    format!("{} {} {}", REMOTE_INTERPRETER, quote(script), quote(remote_path))
}

pub fn inline_command(program: &str, remote_path: &str) -> String {
    format!("{} -c {} {}", REMOTE_INTERPRETER, quote(program), quote(remote_path))
}

fn run_hash_command(
    transport: &dyn Transport,
    command: &str,
    algorithm: HashAlgorithm,
) -> Result<String, TransportError> {
    let output = transport.exec(command)?.check(command)?;
    parse_digest(&output.stdout_lossy(), command, algorithm)
}

fn parse_digest(stdout: &str, command: &str, algorithm: HashAlgorithm) -> Result<String, TransportError> {
    let digest = stdout.trim().to_ascii_lowercase();
    if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransportError::UnexpectedOutput {
            command: command.to_string(),
            detail: format!("expected a {} hex digest, got {:?}", algorithm, stdout.trim()),
        });
    }
    Ok(digest)
}

/// First of `hash.py`, `hash0.py`, `hash1.py`, ... that does not exist under `root`.
fn free_helper_path(transport: &dyn Transport, root: &str) -> Option<String> {
    let candidates = std::iter::once(String::new()).chain((0..MAX_HELPER_PROBES).map(|i| i.to_string()));
    for suffix in candidates {
        let path = join(root, &format!("{}{}.{}", HELPER_STEM, suffix, HELPER_EXTENSION));
        match transport.stat(&path) {
            Ok(_) => continue,
            Err(e) if e.is_not_found() => return Some(path),
            Err(e) => {
                warn!("Cannot probe {}: {}", path, e);
                return None;
            }
        }
    }
    warn!("No free helper name under {} after {} probes", root, MAX_HELPER_PROBES + 1);
    None
}

fn install_helper(
    transport: &dyn Transport,
    root: &str,
    algorithm: HashAlgorithm,
    program: &str,
) -> Option<String> {
    let path = free_helper_path(transport, root)?;

    if let Err(e) = transport.upload(program.as_bytes(), &path) {
        warn!("Uploading hashing helper to {} failed: {}", path, e);
        return None;
    }

    // The helper hashes itself; a mismatch means it cannot be run as uploaded.
    let expected = stream::hash_bytes(program.as_bytes(), algorithm);
    let verified = match run_hash_command(transport, &script_command(&path, &path), algorithm) {
        Ok(actual) if actual == expected => true,
        Ok(actual) => {
            warn!("Hashing helper self-check returned {} instead of {}", actual, expected);
            false
        }
        Err(e) => {
            warn!("Hashing helper self-check failed: {}", e);
            false
        }
    };

    if verified {
        Some(path)
    } else {
        if let Err(e) = transport.remove(&path) {
            warn!("Could not remove unusable helper {}: {}", path, e);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest_accepts_trailing_newline() {
        let digest = parse_digest(
            "A9993E364706816ABA3E25717850C26C9CD0D89D\n",
            "cmd",
            HashAlgorithm::Sha1,
        )
        .unwrap();
        assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_parse_digest_rejects_garbage() {
        assert!(parse_digest("", "cmd", HashAlgorithm::Sha1).is_err());
        assert!(parse_digest("Traceback (most recent call last)", "cmd", HashAlgorithm::Md5).is_err());
        // right length, wrong algorithm
        assert!(parse_digest("d41d8cd98f00b204e9800998ecf8427e", "cmd", HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn test_commands_end_with_quoted_target() {
        let script = script_command("/srv/hash.py", "/srv/my file.txt");
        assert_eq!(script, "python3 /srv/hash.py '/srv/my file.txt'");

        let inline = inline_command(&helper_program(HashAlgorithm::Sha1, 65536), "/srv/a.txt");
        assert!(inline.starts_with("python3 -c '"));
        assert!(inline.ends_with("' /srv/a.txt"));
        assert!(inline.contains("file.read(65536)"));
    }

    #[test]
    fn test_helper_program_names_algorithm() {
        let program = helper_program(HashAlgorithm::Sha256, 4096);
        assert!(program.contains("hashlib.new('sha256')"));
        assert!(program.contains("file.read(4096)"));
    }
}
