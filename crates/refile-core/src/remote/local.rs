use super::{CommandOutput, RemoteFile, RemoteStat, Transport, TransportError};
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use walkdir::WalkDir;

/// Treats this machine as the remote host.
///
/// Commands run through `sh -c`; everything else goes straight to the
/// filesystem. Useful when the reference tree is a mounted share, and for
/// tests.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

fn map_io(path: &str, context: &str, err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::NotFound {
        TransportError::NotFound(path.to_string())
    } else {
        TransportError::io(format!("{} {}", context, path), err)
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

impl Transport for LocalTransport {
    fn exec(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| TransportError::io(format!("running `{}`", command), e))?;
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code().unwrap_or(-1),
        })
    }

    fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        let metadata = fs::metadata(path).map_err(|e| map_io(path, "stat", e))?;
        let modified = metadata.modified().map_err(|e| map_io(path, "mtime of", e))?;
        let accessed = metadata.accessed().unwrap_or(modified);
        Ok(RemoteStat {
            size: metadata.len(),
            modified,
            accessed,
            permissions: permission_bits(&metadata),
        })
    }

    fn list_regular_files(&self, root: &str) -> Result<Vec<RemoteFile>, TransportError> {
        let metadata = fs::metadata(root).map_err(|e| map_io(root, "listing", e))?;
        if !metadata.is_dir() {
            return Err(TransportError::io(
                format!("listing {}", root),
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.to_string());
                TransportError::io(format!("listing {}", path), io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = path_to_str(entry.path())?;
            let file = RemoteFile::from_path(&path).ok_or_else(|| TransportError::UnexpectedOutput {
                command: format!("listing {}", root),
                detail: format!("cannot split {:?}", path),
            })?;
            files.push(file);
        }
        Ok(files)
    }

    fn upload(&self, content: &[u8], path: &str) -> Result<(), TransportError> {
        fs::write(path, content).map_err(|e| TransportError::io(format!("writing {}", path), e))
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        fs::remove_file(path).map_err(|e| map_io(path, "removing", e))
    }

    fn supports_concurrency(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
    }
}

fn path_to_str(path: &Path) -> Result<String, TransportError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| TransportError::UnexpectedOutput {
            command: "listing".to_string(),
            detail: format!("non UTF-8 path {}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_skips_directories() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/f.txt"), "x").unwrap();
        fs::write(tmp.path().join("top.txt"), "y").unwrap();

        let root = tmp.path().to_str().unwrap();
        let files = LocalTransport.list_regular_files(root).unwrap();
        let mut paths: Vec<String> = files.iter().map(RemoteFile::path).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![format!("{}/a/b/f.txt", root), format!("{}/top.txt", root)]
        );
    }

    #[test]
    fn test_stat_missing_is_not_found() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("gone");
        let err = LocalTransport.stat(missing.to_str().unwrap()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_upload_stat_remove() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("up.bin");
        let path = path.to_str().unwrap();

        LocalTransport.upload(b"12345", path).unwrap();
        assert_eq!(LocalTransport.stat(path).unwrap().size, 5);
        LocalTransport.remove(path).unwrap();
        assert!(LocalTransport.stat(path).unwrap_err().is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_captures_status_and_streams() {
        let output = LocalTransport.exec("echo out; echo err >&2; exit 3").unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err");
    }
}
