use crate::error::Error;
use crate::hasher::{HashAlgorithm, DEFAULT_CHUNK_SIZE};
use crate::relocator::LinkMode;
use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything one run needs, after file, environment and flag layering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub local_root: Option<PathBuf>,
    pub remote_root: Option<String>,
    /// Defaults to `./<last segment of remote_root>`.
    pub output_root: Option<PathBuf>,
    pub hash_algorithm: HashAlgorithm,
    pub chunk_size: usize,
    pub link_mode: LinkMode,
    pub copy: bool,
    pub preserve_timestamps: bool,
    pub timestamp_bias_secs: u64,
    pub preserve_permissions: bool,
    pub clean_empty_dirs: bool,
    pub stop_on_error: bool,
    pub dry_run: bool,
    pub workers: usize,
    pub verbosity: u8,
    /// Glob patterns matched against local paths; matching subtrees are not indexed.
    pub ignore_patterns: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            remote_root: None,
            output_root: None,
            hash_algorithm: HashAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            link_mode: LinkMode::default(),
            copy: false,
            preserve_timestamps: true,
            timestamp_bias_secs: 0,
            preserve_permissions: false,
            clean_empty_dirs: false,
            stop_on_error: false,
            dry_run: false,
            workers: default_workers(),
            verbosity: 1,
            ignore_patterns: Vec::new(),
        }
    }
}

impl RunConfig {
    /// The configured output root, or one derived from the remote root.
    pub fn resolve_output_root(&self) -> Result<PathBuf, Error> {
        if let Some(output) = &self.output_root {
            return Ok(output.clone());
        }
        let remote = self
            .remote_root
            .as_deref()
            .ok_or_else(|| Error::Config("remote_root is not set".to_string()))?;
        default_output_root(remote).ok_or_else(|| {
            Error::Config(format!(
                "Cannot derive an output directory from remote root {}; set output_root",
                remote
            ))
        })
    }

    /// Link mode actually applied: copies never leave links behind.
    pub fn effective_link_mode(&self) -> LinkMode {
        if self.copy {
            LinkMode::None
        } else {
            self.link_mode
        }
    }
}

/// `./<last segment>` of a remote root, `None` for `/` or an empty string.
pub fn default_output_root(remote_root: &str) -> Option<PathBuf> {
    let last = remote_root.split('/').filter(|s| !s.is_empty()).last()?;
    if last == "." || last == ".." {
        return None;
    }
    Some(Path::new(".").join(last))
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Layer `path` (or an optional `Refile.toml` in the working directory) and
/// `REFILE_*` environment variables over the defaults.
pub fn load_configuration(path: Option<&Path>) -> Result<RunConfig, Error> {
    let file = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Refile").required(false),
    };
    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("REFILE")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    Ok(settings.try_deserialize::<RunConfig>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha1);
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.link_mode, LinkMode::Symlink);
        assert!(config.preserve_timestamps);
        assert_eq!(config.timestamp_bias_secs, 0);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("refile.toml");
        fs::write(
            &path,
            "local_root = \"/data/local\"\n\
             remote_root = \"/srv/files\"\n\
             hash_algorithm = \"sha256\"\n\
             link_mode = \"hardlink\"\n\
             ignore_patterns = [\"*/.git\"]\n",
        )
        .unwrap();

        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.local_root, Some(PathBuf::from("/data/local")));
        assert_eq!(config.remote_root.as_deref(), Some("/srv/files"));
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.link_mode, LinkMode::Hardlink);
        assert_eq!(config.ignore_patterns, vec!["*/.git".to_string()]);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.preserve_timestamps);
    }

    #[test]
    fn test_unknown_algorithm_in_file_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("refile.toml");
        fs::write(&path, "hash_algorithm = \"crc32\"\n").unwrap();

        assert!(matches!(load_configuration(Some(&path)), Err(Error::Settings(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempdir().unwrap();
        assert!(load_configuration(Some(&tmp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_default_output_root() {
        assert_eq!(default_output_root("/srv/files"), Some(PathBuf::from("./files")));
        assert_eq!(default_output_root("/srv/files/"), Some(PathBuf::from("./files")));
        assert_eq!(default_output_root("/"), None);
        assert_eq!(default_output_root(""), None);
    }

    #[test]
    fn test_resolve_output_root() {
        let mut config = RunConfig {
            remote_root: Some("/srv/music".to_string()),
            ..RunConfig::default()
        };
        assert_eq!(config.resolve_output_root().unwrap(), PathBuf::from("./music"));

        config.output_root = Some(PathBuf::from("/tmp/out"));
        assert_eq!(config.resolve_output_root().unwrap(), PathBuf::from("/tmp/out"));

        let unset = RunConfig::default();
        assert!(matches!(unset.resolve_output_root(), Err(Error::Config(_))));
    }

    #[test]
    fn test_copy_disables_links() {
        let config = RunConfig {
            copy: true,
            link_mode: LinkMode::Hardlink,
            ..RunConfig::default()
        };
        assert_eq!(config.effective_link_mode(), LinkMode::None);
    }
}
