use crate::plan::{PlanEntry, RelocationPlan};
use crate::progress::ProgressReporter;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// What to leave at a moved file's old location.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    None,
    #[default]
    Symlink,
    Hardlink,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkMode::None => "none",
            LinkMode::Symlink => "symlink",
            LinkMode::Hardlink => "hardlink",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Move,
    Copy,
}

#[derive(Debug, Clone)]
pub struct RelocationOptions {
    pub transfer: Transfer,
    /// Ignored for [`Transfer::Copy`].
    pub link: LinkMode,
    pub preserve_timestamps: bool,
    /// Added to the remote mtime/atime so a later sync does not see the
    /// remote copy as newer.
    pub timestamp_bias: Duration,
    pub preserve_permissions: bool,
    pub stop_on_error: bool,
    /// Remove source directories emptied by moves, up to (not including) this root.
    pub clean_empty_dirs_under: Option<PathBuf>,
}

impl Default for RelocationOptions {
    fn default() -> Self {
        Self {
            transfer: Transfer::Move,
            link: LinkMode::Symlink,
            preserve_timestamps: true,
            timestamp_bias: Duration::ZERO,
            preserve_permissions: false,
            stop_on_error: false,
            clean_empty_dirs_under: None,
        }
    }
}

#[derive(Error, Debug)]
#[error("{step} {}: {source}", path.display())]
pub struct RelocationError {
    pub step: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl RelocationError {
    fn new(step: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            step,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationStatus {
    Done,
    Failed(String),
    /// Not attempted because an earlier entry failed with `stop_on_error`.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationOutcome {
    pub target: PathBuf,
    pub source: PathBuf,
    pub status: RelocationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RelocationReport {
    pub outcomes: Vec<RelocationOutcome>,
    pub removed_dirs: Vec<PathBuf>,
    pub duration: Duration,
}

impl RelocationReport {
    fn count(&self, pred: impl Fn(&RelocationStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == RelocationStatus::Done)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RelocationStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == RelocationStatus::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }
}

/// Applies a validated [`RelocationPlan`] to the local filesystem.
///
/// Entries are independent; each one yields an outcome and nothing is rolled
/// back when a later entry fails.
pub struct Relocator {
    options: RelocationOptions,
}

impl Relocator {
    pub fn new(options: RelocationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RelocationOptions {
        &self.options
    }

    pub fn relocate(&self, plan: &RelocationPlan, reporter: &dyn ProgressReporter) -> RelocationReport {
        let start = Instant::now();
        let total = plan.len();
        let mut report = RelocationReport::default();
        let mut abort = false;

        reporter.on_relocate_start(total);
        for (index, (target, entry)) in plan.iter().enumerate() {
            let status = if abort {
                RelocationStatus::Skipped
            } else {
                match self.relocate_one(target, entry) {
                    Ok(()) => {
                        debug!("{} -> {}", entry.source.display(), target.display());
                        RelocationStatus::Done
                    }
                    Err(e) => {
                        error!("Failed to relocate {}: {}", entry.source.display(), e);
                        abort = self.options.stop_on_error;
                        RelocationStatus::Failed(e.to_string())
                    }
                }
            };
            report.outcomes.push(RelocationOutcome {
                target: target.clone(),
                source: entry.source.clone(),
                status,
            });
            reporter.on_relocate_progress(index + 1, total);
        }

        if let Some(root) = &self.options.clean_empty_dirs_under {
            if self.options.transfer == Transfer::Move {
                report.removed_dirs = self.clean_empty_dirs(&report.outcomes, root);
            }
        }

        report.duration = start.elapsed();
        info!(
            "Relocation finished: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        reporter.on_relocate_complete(
            report.succeeded(),
            report.failed(),
            report.duration.as_secs_f64(),
        );
        report
    }

    fn relocate_one(&self, target: &Path, entry: &PlanEntry) -> Result<(), RelocationError> {
        let source = entry.source.as_path();

        if fs::symlink_metadata(target).is_ok() {
            return Err(RelocationError::new(
                "refusing to overwrite",
                target,
                io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
            ));
        }
        let times = if self.options.preserve_timestamps {
            Some(self.biased_times(target, entry)?)
        } else {
            None
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| RelocationError::new("creating directory", parent, e))?;
        }

        match self.options.transfer {
            Transfer::Copy => {
                fs::copy(source, target).map_err(|e| RelocationError::new("copying", source, e))?;
            }
            Transfer::Move => {
                move_file(source, target)?;
                self.leave_link(source, target)?;
            }
        }

        if let Some((accessed, modified)) = times {
            filetime::set_file_times(target, accessed, modified)
                .map_err(|e| RelocationError::new("setting timestamps on", target, e))?;
        }
        if self.options.preserve_permissions {
            set_permissions(target, entry.remote.permissions)?;
        }
        Ok(())
    }

    /// Remote atime and mtime plus the bias, checked before the file is touched.
    fn biased_times(&self, target: &Path, entry: &PlanEntry) -> Result<(FileTime, FileTime), RelocationError> {
        let bias = self.options.timestamp_bias;
        let shift = |time: SystemTime| {
            time.checked_add(bias).map(FileTime::from_system_time).ok_or_else(|| {
                RelocationError::new(
                    "applying timestamp bias to",
                    target,
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("bias of {}s is out of range", bias.as_secs()),
                    ),
                )
            })
        };
        Ok((shift(entry.remote.accessed)?, shift(entry.remote.modified)?))
    }

    fn leave_link(&self, source: &Path, target: &Path) -> Result<(), RelocationError> {
        match self.options.link {
            LinkMode::None => Ok(()),
            LinkMode::Symlink => {
                symlink_file(target, source).map_err(|e| RelocationError::new("creating symlink at", source, e))
            }
            LinkMode::Hardlink => {
                fs::hard_link(target, source).map_err(|e| RelocationError::new("creating hard link at", source, e))
            }
        }
    }

    fn clean_empty_dirs(&self, outcomes: &[RelocationOutcome], root: &Path) -> Vec<PathBuf> {
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        for outcome in outcomes.iter().filter(|o| o.status == RelocationStatus::Done) {
            for dir in outcome.source.ancestors().skip(1) {
                if dir == root || !dir.starts_with(root) {
                    break;
                }
                dirs.insert(dir.to_path_buf());
            }
        }

        // Deepest first so parents empty out before they are tried.
        let mut ordered: Vec<PathBuf> = dirs.into_iter().collect();
        ordered.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        let mut removed = Vec::new();
        for dir in ordered {
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    debug!("Removed empty directory {}", dir.display());
                    removed.push(dir);
                }
                Err(e) => debug!("Keeping {}: {}", dir.display(), e),
            }
        }
        removed
    }
}

/// Rename, or copy and delete when a rename is not possible (e.g. across
/// filesystems).
fn move_file(source: &Path, target: &Path) -> Result<(), RelocationError> {
    let rename_err = match fs::rename(source, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(
        "rename {} -> {} failed ({}), copying instead",
        source.display(),
        target.display(),
        rename_err
    );
    if let Err(copy_err) = fs::copy(source, target) {
        let _ = fs::remove_file(target);
        warn!("Copy fallback failed for {}: {}", source.display(), copy_err);
        return Err(RelocationError::new("moving", source, rename_err));
    }
    fs::remove_file(source).map_err(|e| RelocationError::new("removing moved source", source, e))
}

#[cfg(unix)]
fn symlink_file(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_file(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(unix)]
fn set_permissions(target: &Path, mode: u32) -> Result<(), RelocationError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
        .map_err(|e| RelocationError::new("setting permissions on", target, e))
}

#[cfg(not(unix))]
fn set_permissions(target: &Path, mode: u32) -> Result<(), RelocationError> {
    let mut permissions = fs::metadata(target)
        .map_err(|e| RelocationError::new("reading permissions of", target, e))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(target, permissions).map_err(|e| RelocationError::new("setting permissions on", target, e))
}
