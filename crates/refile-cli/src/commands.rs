use clap::{Args, Parser, Subcommand};
use refile_core::{HashAlgorithm, LinkMode, RunConfig};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "refile")]
#[command(
    about = "Move existing local files into the directory structure of a remote tree",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Match local files against a remote tree and relocate them
    Run(RunArgs),
    /// Print the merged configuration as TOML
    PrintConfig {
        /// Configuration file to read instead of ./Refile.toml
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// SSH host, optionally `user@host` and/or `host:port`; `local` uses this machine
    pub host: String,

    /// Directory on the remote host whose structure is reproduced
    pub remote_dir: String,

    /// Directory to search for existing files
    pub local_dir: PathBuf,

    /// Username for the SSH connection, overriding the one in <HOST>
    #[arg(short, long, value_name = "USERNAME")]
    pub username: Option<String>,

    /// Port for the SSH connection, overriding the one in <HOST>
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Local directory to build the remote structure in
    #[arg(short, long = "out-dir", value_name = "OUT_DIR")]
    pub out_dir: Option<PathBuf>,

    /// Don't leave symbolic links at the old locations
    #[arg(short = 'l', long, conflicts_with = "hard")]
    pub no_symlinks: bool,

    /// Leave hard links instead of symbolic links at the old locations
    #[arg(short = 'd', long)]
    pub hard: bool,

    /// SSH identity file
    #[arg(short, long, value_name = "KEYFILE")]
    pub keyfile: Option<PathBuf>,

    /// 0: errors only, 1: transfers and warnings, 2: everything (default when given without a level)
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        num_args = 0..=1,
        default_missing_value = "2",
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub verbosity: Option<u8>,

    /// Remove directories left empty by moving files out of them
    #[arg(short = 'x', long)]
    pub clean: bool,

    /// Copy instead of move; no links are created
    #[arg(short, long)]
    pub copy: bool,

    /// Hash function used on both machines
    #[arg(short = 'f', long, value_name = "ALGORITHM")]
    pub hash_function: Option<HashAlgorithm>,

    /// Don't copy timestamps or permissions from the remote files
    #[arg(short = 'n', long, conflicts_with = "permissions")]
    pub no_file_attributes: bool,

    /// Apply the remote permission bits to relocated files
    #[arg(short = 'P', long)]
    pub permissions: bool,

    /// Seconds added to remote timestamps when applying them
    #[arg(long, value_name = "SECONDS")]
    pub timestamp_bias: Option<u64>,

    /// Only connect if the host key is already known
    #[arg(long)]
    pub req_existing_hostkey: bool,

    /// Don't use keys from ~/.ssh or the SSH agent
    #[arg(long)]
    pub no_local_keys: bool,

    /// Match and validate, but don't touch any file
    #[arg(long)]
    pub dry_run: bool,

    /// Stop relocating after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Parallel remote hashing commands (local host only)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Configuration file to read instead of ./Refile.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    pub fn is_local_host(&self) -> bool {
        matches!(self.host.as_str(), "local" | "localhost")
    }

    /// Flags win over file and environment settings.
    pub fn apply(&self, config: &mut RunConfig) {
        config.local_root = Some(self.local_dir.clone());
        config.remote_root = Some(self.remote_dir.clone());
        if let Some(out_dir) = &self.out_dir {
            config.output_root = Some(out_dir.clone());
        }
        if self.no_symlinks {
            config.link_mode = LinkMode::None;
        } else if self.hard {
            config.link_mode = LinkMode::Hardlink;
        }
        if let Some(level) = self.verbosity {
            config.verbosity = level;
        }
        if let Some(algorithm) = self.hash_function {
            config.hash_algorithm = algorithm;
        }
        if let Some(bias) = self.timestamp_bias {
            config.timestamp_bias_secs = bias;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_file_attributes {
            config.preserve_timestamps = false;
            config.preserve_permissions = false;
        }
        config.preserve_permissions |= self.permissions;
        config.clean_empty_dirs |= self.clean;
        config.copy |= self.copy;
        config.dry_run |= self.dry_run;
        config.stop_on_error |= self.stop_on_error;
    }
}
