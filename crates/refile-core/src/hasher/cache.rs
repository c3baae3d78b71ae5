use super::{stream, HashAlgorithm};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Per-run map of local path -> content digest.
///
/// The vacant entry keeps its shard locked while the file is hashed, so two
/// threads asking for the same path never hash it twice.
pub struct HashCache {
    algorithm: HashAlgorithm,
    chunk_size: usize,
    hashes: DashMap<PathBuf, String>,
}

impl HashCache {
    pub fn new(algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size,
            hashes: DashMap::new(),
        }
    }

    /// Look up a file's digest, hashing and storing it on a miss.
    pub fn get_content_hash(&self, file: &Path) -> io::Result<String> {
        if let Some(hash) = self.hashes.get(file) {
            trace!("Found hash for {} in cache", file.display());
            return Ok(hash.value().clone());
        }

        match self.hashes.entry(file.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let hash = stream::hash_file(file, self.algorithm, self.chunk_size)?;
                trace!("No hash found for {} in cache, adding", file.display());
                entry.insert(hash.clone());
                Ok(hash)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
