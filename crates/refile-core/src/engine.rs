use crate::config::RunConfig;
use crate::error::Error;
use crate::matcher::{MatchOutcome, MatchStats, MatchWarning, Matcher};
use crate::path_mapper::PathMapper;
use crate::plan::RelocationPlan;
use crate::progress::ProgressReporter;
use crate::relocator::{LinkMode, RelocationOptions, RelocationReport, Relocator, Transfer};
use crate::remote::{self, HashingStrategy, RemoteEntry, RemoteHasher, Transport};
use crate::scanner::{ScanIssue, ScanStats, SizeIndex};
use crate::validator;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One relocation run against one transport.
pub struct Engine {
    config: RunConfig,
    transport: Arc<dyn Transport>,
    local_root: PathBuf,
    remote_root: String,
    output_root: PathBuf,
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub index_duration: Duration,
    pub enumerate_duration: Duration,
    pub match_duration: Duration,
    pub relocate_duration: Duration,
    pub scan_stats: ScanStats,
    pub scan_issues: Vec<ScanIssue>,
    pub strategy: HashingStrategy,
    pub match_stats: MatchStats,
    pub warnings: Vec<MatchWarning>,
    pub plan: RelocationPlan,
    /// `None` for a dry run.
    pub relocation: Option<RelocationReport>,
}

impl RunReport {
    pub fn dry_run(&self) -> bool {
        self.relocation.is_none()
    }

    /// False when any planned entry failed or was skipped.
    pub fn success(&self) -> bool {
        self.relocation.as_ref().map_or(true, RelocationReport::is_success)
    }
}

impl Engine {
    /// Check `config` against the local filesystem before any remote work.
    pub fn new(config: RunConfig, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        let local_root = config
            .local_root
            .clone()
            .ok_or_else(|| Error::Config("local_root is not set".to_string()))?;
        let local_root = fs::canonicalize(&local_root).map_err(|e| {
            Error::Config(format!("Local directory {} is not accessible: {}", local_root.display(), e))
        })?;
        if !local_root.is_dir() {
            return Err(Error::Config(format!(
                "Local path {} is not a directory",
                local_root.display()
            )));
        }

        let remote_root = config
            .remote_root
            .clone()
            .ok_or_else(|| Error::Config("remote_root is not set".to_string()))?;
        if !remote_root.starts_with('/') {
            return Err(Error::Config(format!(
                "Remote directory {} must be an absolute path",
                remote_root
            )));
        }

        let output_root = absolute(&config.resolve_output_root()?)?;
        check_output_root(&output_root)?;
        check_disjoint("Output", &output_root, &local_root)?;
        if transport.is_local() {
            let remote_path = Path::new(&remote_root);
            check_disjoint("Remote", remote_path, &local_root)?;
            check_disjoint("Remote", remote_path, &output_root)?;
        }

        if config.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if config.copy && config.link_mode != LinkMode::None {
            warn!("Copying files; no {} will be left at the original locations", config.link_mode);
        }

        debug!(
            "Engine configured: local {}, remote {}, output {}",
            local_root.display(),
            remote_root,
            output_root.display()
        );
        Ok(Self {
            config,
            transport,
            local_root,
            remote_root,
            output_root,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Run all phases:
    /// 1. Index local files by size
    /// 2. Negotiate remote hashing and list remote files
    /// 3. Match by size, then digest
    /// 4. Validate the whole plan
    /// 5. Relocate (skipped for a dry run)
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunReport, Error> {
        let started_at = Local::now();
        let config = &self.config;

        // Phase 1: Index
        info!("Indexing local files under {}...", self.local_root.display());
        reporter.on_index_start();
        let index_start = Instant::now();
        let (index, scan_issues) = SizeIndex::build(&self.local_root, &config.ignore_patterns)?;
        let index_duration = index_start.elapsed();
        let scan_stats = index.stats();
        debug!(
            "Index completed in {:.2}s: {} distinct sizes, {} files, {} bytes total",
            index_duration.as_secs_f64(),
            scan_stats.distinct_sizes,
            scan_stats.total_files,
            scan_stats.total_size,
        );
        reporter.on_index_complete(scan_stats.total_files, index_duration.as_secs_f64());

        // Phase 2: Negotiate and enumerate
        info!("Negotiating remote hashing...");
        let mut hasher = RemoteHasher::negotiate(
            Arc::clone(&self.transport),
            &self.remote_root,
            config.hash_algorithm,
            config.chunk_size,
        )?;
        let strategy = hasher.strategy().clone();

        let mapper = PathMapper::new(&self.remote_root, &self.output_root);
        let mut matcher = Matcher::new(index, config.hash_algorithm, config.chunk_size);
        let phases = self.enumerate_and_match(&hasher, &mut matcher, &mapper, reporter);
        if let Err(e) = hasher.cleanup() {
            warn!("Could not remove hashing helper from the remote: {}", e);
        }
        let (enumerate_duration, match_duration, outcome) = phases?;
        let MatchOutcome { plan, warnings, stats } = outcome;

        // Phase 4: Validate
        info!("Validating relocation plan with {} entries...", plan.len());
        let conflicts = validator::validate(&plan, &mapper);
        if !conflicts.is_empty() {
            return Err(Error::Consistency(conflicts));
        }

        let mut report = RunReport {
            started_at,
            index_duration,
            enumerate_duration,
            match_duration,
            relocate_duration: Duration::ZERO,
            scan_stats,
            scan_issues,
            strategy,
            match_stats: stats,
            warnings,
            plan,
            relocation: None,
        };

        if config.dry_run {
            info!("Dry run: {} files would be relocated", report.plan.len());
            return Ok(report);
        }

        // Phase 5: Relocate
        info!("Relocating {} files into {}...", report.plan.len(), self.output_root.display());
        fs::create_dir_all(&self.output_root)?;
        let relocation = Relocator::new(self.relocation_options()).relocate(&report.plan, reporter);
        report.relocate_duration = relocation.duration;
        report.relocation = Some(relocation);
        Ok(report)
    }

    fn enumerate_and_match(
        &self,
        hasher: &RemoteHasher,
        matcher: &mut Matcher,
        mapper: &PathMapper,
        reporter: &dyn ProgressReporter,
    ) -> Result<(Duration, Duration, MatchOutcome), Error> {
        info!("Listing remote files under {}...", self.remote_root);
        reporter.on_enumerate_start();
        let enumerate_start = Instant::now();
        let entries: Vec<RemoteEntry> =
            remote::enumerate(self.transport.as_ref(), &self.remote_root, hasher.helper_path())?;
        let enumerate_duration = enumerate_start.elapsed();
        debug!(
            "Enumeration completed in {:.2}s: {} remote files",
            enumerate_duration.as_secs_f64(),
            entries.len()
        );
        reporter.on_enumerate_complete(entries.len(), enumerate_duration.as_secs_f64());

        // Phase 3: Match
        info!("Matching {} remote files...", entries.len());
        let match_start = Instant::now();
        let outcome = matcher.match_entries(&entries, hasher, mapper, self.config.workers, reporter)?;
        let match_duration = match_start.elapsed();
        debug!(
            "Matching completed in {:.2}s: {} matched, {} local files hashed",
            match_duration.as_secs_f64(),
            outcome.stats.matched,
            outcome.stats.local_hashed,
        );
        reporter.on_match_complete(outcome.stats.matched, match_duration.as_secs_f64());
        Ok((enumerate_duration, match_duration, outcome))
    }

    fn relocation_options(&self) -> RelocationOptions {
        let config = &self.config;
        RelocationOptions {
            transfer: if config.copy { Transfer::Copy } else { Transfer::Move },
            link: config.effective_link_mode(),
            preserve_timestamps: config.preserve_timestamps,
            timestamp_bias: Duration::from_secs(config.timestamp_bias_secs),
            preserve_permissions: config.preserve_permissions,
            stop_on_error: config.stop_on_error,
            clean_empty_dirs_under: config.clean_empty_dirs.then(|| self.local_root.clone()),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Canonical form of `path` where it exists, with any missing tail appended as given.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, Error> {
    let path = absolute(path)?;
    let mut missing = Vec::new();
    let mut existing = path.as_path();
    loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => return Ok(missing.iter().rev().fold(canonical, |acc, part| acc.join(part))),
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(path.clone()),
            },
        }
    }
}

/// Neither directory may contain the other.
fn check_disjoint(label: &str, path: &Path, other: &Path) -> Result<(), Error> {
    let path = resolve_existing_prefix(path)?;
    let other = resolve_existing_prefix(other)?;
    if path.starts_with(&other) || other.starts_with(&path) {
        return Err(Error::Config(format!(
            "{} directory {} overlaps {}",
            label,
            path.display(),
            other.display()
        )));
    }
    Ok(())
}

/// The output root must not exist yet or be an empty directory.
fn check_output_root(output_root: &Path) -> Result<(), Error> {
    match fs::symlink_metadata(output_root) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Config(format!(
            "Output directory {} is not accessible: {}",
            output_root.display(),
            e
        ))),
        Ok(metadata) if !metadata.is_dir() => Err(Error::Config(format!(
            "Output path {} exists and is not a directory",
            output_root.display()
        ))),
        Ok(_) => {
            let mut entries = fs::read_dir(output_root)?;
            if entries.next().is_some() {
                Err(Error::Config(format!(
                    "Output directory {} is not empty",
                    output_root.display()
                )))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::LocalTransport;
    use tempfile::tempdir;

    fn config_for(local: &Path, remote: &Path, output: &Path) -> RunConfig {
        RunConfig {
            local_root: Some(local.to_path_buf()),
            remote_root: Some(remote.to_string_lossy().into_owned()),
            output_root: Some(output.to_path_buf()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_populated_output_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, remote, out) = (tmp.path().join("l"), tmp.path().join("r"), tmp.path().join("o"));
        for dir in [&local, &remote, &out] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(out.join("already.txt"), "x").unwrap();

        let result = Engine::new(config_for(&local, &remote, &out), Arc::new(LocalTransport::new()));
        match result {
            Err(Error::Config(message)) => assert!(message.contains("not empty")),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("populated output root accepted"),
        }
    }

    #[test]
    fn test_empty_or_missing_output_root_is_accepted() {
        let tmp = tempdir().unwrap();
        let (local, remote) = (tmp.path().join("l"), tmp.path().join("r"));
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&remote).unwrap();
        let empty = tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        assert!(Engine::new(config_for(&local, &remote, &empty), Arc::clone(&transport)).is_ok());
        assert!(Engine::new(config_for(&local, &remote, &tmp.path().join("missing")), transport).is_ok());
    }

    /// Sibling `local` and `remote` directories plus an `out` path, none nested.
    fn sibling_roots(tmp: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let (local, remote) = (tmp.join("local"), tmp.join("remote"));
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&remote).unwrap();
        (local, remote, tmp.join("out"))
    }

    fn assert_config_error(result: Result<Engine, Error>, needle: &str) {
        match result {
            Err(Error::Config(message)) => assert!(message.contains(needle), "{}", message),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("configuration accepted"),
        }
    }

    #[test]
    fn test_missing_local_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (_, remote, out) = sibling_roots(tmp.path());
        let config = config_for(&tmp.path().join("nope"), &remote, &out);
        assert!(matches!(
            Engine::new(config, Arc::new(LocalTransport::new())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, remote, out) = sibling_roots(tmp.path());
        let mut config = config_for(&local, &remote, &out);
        config.chunk_size = 0;
        assert_config_error(Engine::new(config, Arc::new(LocalTransport::new())), "chunk_size");
    }

    #[test]
    fn test_relative_remote_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, _, out) = sibling_roots(tmp.path());
        let mut config = config_for(&local, &local, &out);
        config.remote_root = Some("relative/dir".to_string());
        assert_config_error(Engine::new(config, Arc::new(LocalTransport::new())), "absolute");
    }

    #[test]
    fn test_remote_root_inside_local_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, _, out) = sibling_roots(tmp.path());
        let mirror = local.join("mirror");
        fs::create_dir_all(&mirror).unwrap();
        fs::write(local.join("zz.txt"), "same").unwrap();
        fs::write(mirror.join("r.txt"), "same").unwrap();

        assert_config_error(
            Engine::new(config_for(&local, &mirror, &out), Arc::new(LocalTransport::new())),
            "overlaps",
        );
        let metadata = fs::symlink_metadata(mirror.join("r.txt")).unwrap();
        assert!(metadata.file_type().is_file());
        assert!(!out.exists());
    }

    #[test]
    fn test_local_root_inside_remote_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, _, out) = sibling_roots(tmp.path());
        assert_config_error(
            Engine::new(config_for(&local, tmp.path(), &out), Arc::new(LocalTransport::new())),
            "overlaps",
        );
    }

    #[test]
    fn test_output_root_inside_local_or_remote_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (local, remote, _) = sibling_roots(tmp.path());
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        assert_config_error(
            Engine::new(config_for(&local, &remote, &local.join("out")), Arc::clone(&transport)),
            "overlaps",
        );
        assert_config_error(
            Engine::new(config_for(&local, &remote, &remote.join("out")), transport),
            "overlaps",
        );
    }

    #[test]
    fn test_relocation_options_follow_config() {
        let tmp = tempdir().unwrap();
        let (local, remote, out) = sibling_roots(tmp.path());
        let mut config = config_for(&local, &remote, &out);
        config.copy = true;
        config.timestamp_bias_secs = 2;
        config.clean_empty_dirs = true;

        let engine = Engine::new(config, Arc::new(LocalTransport::new())).unwrap();
        let options = engine.relocation_options();
        assert_eq!(options.transfer, Transfer::Copy);
        assert_eq!(options.link, LinkMode::None);
        assert_eq!(options.timestamp_bias, Duration::from_secs(2));
        assert_eq!(options.clean_empty_dirs_under.as_deref(), Some(engine.local_root()));
    }
}
