use crate::path_mapper::PathMapper;
use crate::plan::RelocationPlan;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error};

/// A reason the plan cannot be applied as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// `ancestor` is both a file target and a directory on the way to `target`.
    AncestorIsFile {
        ancestor: PathBuf,
        ancestor_source: PathBuf,
        target: PathBuf,
        source: PathBuf,
    },
    /// `blocking` already exists on disk as a non-directory on the way to `target`.
    BlockedByFile {
        blocking: PathBuf,
        target: PathBuf,
        source: PathBuf,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::AncestorIsFile {
                ancestor,
                ancestor_source,
                target,
                source,
            } => write!(
                f,
                "cannot have a file and a directory at the same location: {} should become {} but {} should become {}",
                ancestor_source.display(),
                ancestor.display(),
                source.display(),
                target.display()
            ),
            Conflict::BlockedByFile {
                blocking,
                target,
                source,
            } => write!(
                f,
                "{} is a file but {} should become {}",
                blocking.display(),
                source.display(),
                target.display()
            ),
        }
    }
}

/// Check the whole plan before anything is moved.
///
/// Every target's ancestors below the output root are looked up in the plan;
/// each hit is one [`Conflict::AncestorIsFile`]. Targets whose directories are
/// already occupied by files on disk give [`Conflict::BlockedByFile`].
pub fn validate(plan: &RelocationPlan, mapper: &PathMapper) -> Vec<Conflict> {
    let output_root = mapper.output_root();
    let mut conflicts = Vec::new();

    for (target, entry) in plan {
        let mut ancestors: Vec<_> = target
            .ancestors()
            .skip(1)
            .take_while(|a| a.starts_with(output_root) && *a != output_root)
            .collect();
        ancestors.reverse();

        for ancestor in ancestors {
            if let Some(parent_entry) = plan.get(ancestor) {
                conflicts.push(Conflict::AncestorIsFile {
                    ancestor: ancestor.to_path_buf(),
                    ancestor_source: parent_entry.source.clone(),
                    target: target.clone(),
                    source: entry.source.clone(),
                });
            }
        }

        if let Some(blocking) = mapper.find_blocking_file(target) {
            conflicts.push(Conflict::BlockedByFile {
                blocking,
                target: target.clone(),
                source: entry.source.clone(),
            });
        }
    }

    if conflicts.is_empty() {
        debug!("Relocation plan with {} entries is consistent", plan.len());
    } else {
        for conflict in &conflicts {
            error!("Consistency error: {}", conflict);
        }
    }
    conflicts
}
