use crate::error::Error;
use crate::remote::RemoteEntry;
use std::collections::btree_map::{self, BTreeMap};
use std::path::{Path, PathBuf};

/// One confirmed match: the local file that will become `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub source: PathBuf,
    pub remote: RemoteEntry,
}

/// Target path -> matched local file, in target order.
#[derive(Debug, Clone, Default)]
pub struct RelocationPlan {
    entries: BTreeMap<PathBuf, PlanEntry>,
}

impl RelocationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a match. A second remote file mapping onto an occupied target is a
    /// [`Error::DuplicateTarget`].
    pub fn insert(&mut self, target: PathBuf, entry: PlanEntry) -> Result<(), Error> {
        match self.entries.entry(target) {
            btree_map::Entry::Occupied(existing) => Err(Error::DuplicateTarget {
                target: existing.key().clone(),
                first: existing.get().remote.path(),
                second: entry.remote.path(),
            }),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, target: &Path) -> Option<&PlanEntry> {
        self.entries.get(target)
    }

    pub fn contains(&self, target: &Path) -> bool {
        self.entries.contains_key(target)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PathBuf, PlanEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a RelocationPlan {
    type Item = (&'a PathBuf, &'a PlanEntry);
    type IntoIter = btree_map::Iter<'a, PathBuf, PlanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::remote::RemoteEntry;
    use std::time::{Duration, UNIX_EPOCH};

    pub fn remote_entry(path: &str, size: u64) -> RemoteEntry {
        let (directory, filename) = path.rsplit_once('/').unwrap();
        RemoteEntry {
            directory: directory.to_string(),
            filename: filename.to_string(),
            size,
            modified: UNIX_EPOCH + Duration::from_secs(1_600_000_000),
            accessed: UNIX_EPOCH + Duration::from_secs(1_600_000_500),
            permissions: 0o640,
        }
    }

    pub fn plan_entry(source: &str, remote: &str) -> PlanEntry {
        PlanEntry {
            source: PathBuf::from(source),
            remote: remote_entry(remote, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::plan_entry;
    use super::*;

    #[test]
    fn test_duplicate_target_is_rejected() {
        let mut plan = RelocationPlan::new();
        plan.insert("/out/a".into(), plan_entry("/local/1", "/r/a")).unwrap();

        let err = plan
            .insert("/out/a".into(), plan_entry("/local/2", "/r/./a"))
            .unwrap_err();
        match err {
            Error::DuplicateTarget { target, first, second } => {
                assert_eq!(target, PathBuf::from("/out/a"));
                assert_eq!(first, "/r/a");
                assert_eq!(second, "/r/./a");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get(Path::new("/out/a")).unwrap().source, PathBuf::from("/local/1"));
    }

    #[test]
    fn test_iterates_in_target_order() {
        let mut plan = RelocationPlan::new();
        plan.insert("/out/b/x".into(), plan_entry("/l/1", "/r/b/x")).unwrap();
        plan.insert("/out/a".into(), plan_entry("/l/2", "/r/a")).unwrap();
        let targets: Vec<_> = plan.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(targets, vec![PathBuf::from("/out/a"), PathBuf::from("/out/b/x")]);
    }
}
