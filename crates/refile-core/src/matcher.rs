use crate::error::Error;
use crate::hasher::{HashAlgorithm, HashCache};
use crate::path_mapper::PathMapper;
use crate::plan::{PlanEntry, RelocationPlan};
use crate::progress::ProgressReporter;
use crate::remote::{RemoteEntry, RemoteHasher, TransportError};
use crate::scanner::SizeIndex;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Something that kept a remote file out of the plan without failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchWarning {
    RemoteHashFailed { remote: String, message: String },
    LocalHashFailed { local: PathBuf, message: String },
    NoContentMatch { remote: String, candidates: usize },
    CandidatesClaimed { remote: String, claimed: usize },
}

impl fmt::Display for MatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchWarning::RemoteHashFailed { remote, message } => {
                write!(f, "could not hash remote file {}: {}", remote, message)
            }
            MatchWarning::LocalHashFailed { local, message } => {
                write!(f, "could not hash local file {}: {}", local.display(), message)
            }
            MatchWarning::NoContentMatch { remote, candidates } => write!(
                f,
                "no local file matches remote file {} ({} candidate(s) of the same size)",
                remote, candidates
            ),
            MatchWarning::CandidatesClaimed { remote, claimed } => write!(
                f,
                "no unclaimed local file matches remote file {} ({} same-size file(s) already matched)",
                remote, claimed
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub remote_files: usize,
    pub size_candidates: usize,
    pub remote_hashed: usize,
    pub local_hashed: usize,
    pub matched: usize,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub plan: RelocationPlan,
    pub warnings: Vec<MatchWarning>,
    pub stats: MatchStats,
}

/// One run's matching state: the size index, the local hash cache and the
/// set of local files already claimed by a match.
pub struct Matcher {
    index: SizeIndex,
    cache: HashCache,
    claimed: HashSet<PathBuf>,
    unreadable: HashSet<PathBuf>,
}

impl Matcher {
    pub fn new(index: SizeIndex, algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            index,
            cache: HashCache::new(algorithm, chunk_size),
            claimed: HashSet::new(),
            unreadable: HashSet::new(),
        }
    }

    pub fn index(&self) -> &SizeIndex {
        &self.index
    }

    /// Build the relocation plan for `entries`.
    ///
    /// Remote files without a same-size local file are skipped silently. The
    /// remote digests of the rest are computed up front (on `workers` threads
    /// if the transport allows it), then entries are matched in order of
    /// remote directory depth: the first unclaimed candidate whose digest
    /// equals the remote one wins.
    pub fn match_entries(
        &mut self,
        entries: &[RemoteEntry],
        hasher: &RemoteHasher,
        mapper: &PathMapper,
        workers: usize,
        reporter: &dyn ProgressReporter,
    ) -> Result<MatchOutcome, Error> {
        let mut ordered: Vec<&RemoteEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.directory.len());

        let with_candidates: Vec<&RemoteEntry> = ordered
            .into_iter()
            .filter(|e| !self.index.candidates(e.size).is_empty())
            .collect();
        debug!(
            "{} of {} remote files have same-size local candidates",
            with_candidates.len(),
            entries.len()
        );

        let mut outcome = MatchOutcome {
            stats: MatchStats {
                remote_files: entries.len(),
                size_candidates: with_candidates.len(),
                ..MatchStats::default()
            },
            ..MatchOutcome::default()
        };

        reporter.on_match_start(with_candidates.len());
        let remote_hashes = hash_remote(&with_candidates, hasher, workers, reporter);

        for (entry, remote_hash) in with_candidates.into_iter().zip(remote_hashes) {
            let remote_path = entry.path();
            let remote_hash = match remote_hash {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Skipping remote file {}: {}", remote_path, e);
                    outcome.warnings.push(MatchWarning::RemoteHashFailed {
                        remote: remote_path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            outcome.stats.remote_hashed += 1;

            match self.find_local(entry, &remote_hash, &mut outcome.warnings) {
                LocalMatch::Found(source) => {
                    let target = mapper.map(&remote_path)?;
                    info!("Matched file {} with remote file {}", source.display(), remote_path);
                    self.claimed.insert(source.clone());
                    outcome.plan.insert(
                        target,
                        PlanEntry {
                            source,
                            remote: entry.clone(),
                        },
                    )?;
                    outcome.stats.matched += 1;
                }
                LocalMatch::Claimed(claimed) => {
                    let warning = MatchWarning::CandidatesClaimed {
                        remote: remote_path,
                        claimed,
                    };
                    warn!("{}", warning);
                    outcome.warnings.push(warning);
                }
                LocalMatch::None(candidates) => {
                    let warning = MatchWarning::NoContentMatch {
                        remote: remote_path,
                        candidates,
                    };
                    warn!("{}", warning);
                    outcome.warnings.push(warning);
                }
            }
        }

        outcome.stats.local_hashed = self.cache.len();
        Ok(outcome)
    }

    fn find_local(
        &mut self,
        entry: &RemoteEntry,
        remote_hash: &str,
        warnings: &mut Vec<MatchWarning>,
    ) -> LocalMatch {
        let candidates = self.index.candidates(entry.size);
        let mut claimed = 0;

        for candidate in candidates {
            if self.claimed.contains(candidate) {
                claimed += 1;
                continue;
            }
            if self.unreadable.contains(candidate) {
                continue;
            }
            match self.cache.get_content_hash(candidate) {
                Ok(hash) if hash == remote_hash => return LocalMatch::Found(candidate.clone()),
                Ok(_) => {}
                Err(e) => {
                    warn!("Error hashing local file {}: {}", candidate.display(), e);
                    warnings.push(MatchWarning::LocalHashFailed {
                        local: candidate.clone(),
                        message: e.to_string(),
                    });
                    self.unreadable.insert(candidate.clone());
                }
            }
        }

        if claimed > 0 {
            LocalMatch::Claimed(claimed)
        } else {
            LocalMatch::None(candidates.len())
        }
    }
}

enum LocalMatch {
    Found(PathBuf),
    Claimed(usize),
    None(usize),
}

/// Remote digests for `entries`, in the same order.
fn hash_remote(
    entries: &[&RemoteEntry],
    hasher: &RemoteHasher,
    workers: usize,
    reporter: &dyn ProgressReporter,
) -> Vec<Result<String, TransportError>> {
    let total = entries.len();
    let done = AtomicUsize::new(0);
    let hash_one = |entry: &&RemoteEntry| {
        let result = hasher.hash(&entry.path());
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.on_match_progress(n, total);
        result
    };

    if workers > 1 && hasher.supports_concurrency() {
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                debug!("Hashing {} remote files on {} workers", total, workers);
                return pool.install(|| entries.par_iter().map(&hash_one).collect());
            }
            Err(e) => warn!("Could not start hashing pool, hashing sequentially: {}", e),
        }
    }
    entries.iter().map(&hash_one).collect()
}
