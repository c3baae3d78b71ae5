use glob::Pattern;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// A path the walk could not index, kept so the caller can report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub distinct_sizes: u64,
    pub total_files: usize,
    pub total_size: u64,
}

/// Local files bucketed by exact byte size.
///
/// Built once from a full walk and never updated afterwards. Paths inside a
/// bucket keep the walk order (file names sorted per directory).
#[derive(Debug, Default)]
pub struct SizeIndex {
    buckets: HashMap<u64, Vec<PathBuf>>,
}

impl SizeIndex {
    /// Walk `local_root` and index every regular file by size.
    ///
    /// Symlinks are neither followed nor indexed. Entries that cannot be read
    /// are returned as [`ScanIssue`]s rather than aborting the walk; only a
    /// missing or unreadable root is an error.
    pub fn build(local_root: &Path, ignore_globs: &[String]) -> io::Result<(Self, Vec<ScanIssue>)> {
        let metadata = std::fs::metadata(local_root).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading local root {}: {}", local_root.display(), err),
            )
        })?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Local root {} is not a directory", local_root.display()),
            ));
        }

        let ignore_patterns = compile_patterns(ignore_globs);
        let mut index = SizeIndex::default();
        let mut issues = Vec::new();

        let walker = WalkDir::new(local_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_ignored(entry.path(), &ignore_patterns));

        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| local_root.to_path_buf());
                    warn!("Skipping {}: {}", path.display(), err);
                    issues.push(ScanIssue {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => index.insert(metadata.len(), entry.into_path()),
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", entry.path().display(), err);
                    issues.push(ScanIssue {
                        path: entry.into_path(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let stats = index.stats();
        debug!(
            "Indexed {} files in {} distinct sizes under {}",
            stats.total_files,
            stats.distinct_sizes,
            local_root.display()
        );
        Ok((index, issues))
    }

    fn insert(&mut self, size: u64, path: PathBuf) {
        self.buckets.entry(size).or_default().push(path);
    }

    /// Local files of exactly `size` bytes, in walk order.
    pub fn candidates(&self, size: u64) -> &[PathBuf] {
        self.buckets.get(&size).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stats(&self) -> ScanStats {
        let mut stats = ScanStats::default();
        for (size, paths) in &self.buckets {
            stats.distinct_sizes += 1;
            stats.total_files += paths.len();
            stats.total_size += size * paths.len() as u64;
        }
        stats
    }
}

impl FromIterator<(u64, PathBuf)> for SizeIndex {
    fn from_iter<I: IntoIterator<Item = (u64, PathBuf)>>(iter: I) -> Self {
        let mut index = SizeIndex::default();
        for (size, path) in iter {
            index.insert(size, path);
        }
        index
    }
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn is_ignored(path: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|pattern| pattern.matches_path(path))
}
