use std::path::PathBuf;

use thiserror::Error;

use crate::remote::TransportError;
use crate::validator::Conflict;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Path error: {0}")]
    Path(String),

    #[error(
        "Consistency error: remote files {first} and {second} both map to {}",
        target.display()
    )]
    DuplicateTarget {
        target: PathBuf,
        first: String,
        second: String,
    },

    #[error("Consistency error: {} conflict(s) in relocation plan:\n{}", .0.len(), format_conflicts(.0))]
    Consistency(Vec<Conflict>),
}

fn format_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("  {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}
