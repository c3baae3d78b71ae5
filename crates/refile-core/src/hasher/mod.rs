pub mod algorithm;
pub mod cache;
pub mod stream;

pub use algorithm::HashAlgorithm;
pub use cache::HashCache;
pub use stream::{hash_file, DEFAULT_CHUNK_SIZE};
