use crate::error::Error;
use std::path::{Path, PathBuf};

/// Maps remote paths onto the output tree.
#[derive(Debug, Clone)]
pub struct PathMapper {
    remote_root: String,
    output_root: PathBuf,
}

impl PathMapper {
    pub fn new(remote_root: &str, output_root: impl Into<PathBuf>) -> Self {
        let trimmed = remote_root.trim_end_matches('/');
        Self {
            remote_root: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// `<remote_root>/a/b/c` -> `<output_root>/a/b/c`.
    ///
    /// The prefix must end on a segment boundary; `.`/`..` segments are
    /// refused so the result can never leave the output root.
    pub fn map(&self, remote_path: &str) -> Result<PathBuf, Error> {
        let rest = if self.remote_root == "/" {
            remote_path.strip_prefix('/')
        } else {
            remote_path
                .strip_prefix(self.remote_root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        }
        .ok_or_else(|| {
            Error::Path(format!(
                "remote path {} is not under remote root {}",
                remote_path, self.remote_root
            ))
        })?;

        let mut local = self.output_root.clone();
        let mut pushed = false;
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(Error::Path(format!(
                    "remote path {} contains a relative segment",
                    remote_path
                )));
            }
            local.push(segment);
            pushed = true;
        }
        if !pushed {
            return Err(Error::Path(format!("remote path {} names the remote root itself", remote_path)));
        }
        Ok(local)
    }

    /// First existing non-directory on the way from the output root to
    /// `target`'s parent, i.e. a file sitting where a directory must go.
    pub fn find_blocking_file(&self, target: &Path) -> Option<PathBuf> {
        let relative = target.strip_prefix(&self.output_root).ok()?;
        let mut current = self.output_root.clone();
        if is_non_directory(&current) {
            return Some(current);
        }
        let components: Vec<_> = relative.components().collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            current.push(component);
            if is_non_directory(&current) {
                return Some(current);
            }
        }
        None
    }
}

fn is_non_directory(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => !metadata.is_dir(),
        Err(_) => false,
    }
}
