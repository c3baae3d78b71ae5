use super::HashAlgorithm;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Stream a file through `algorithm` in `chunk_size` reads and return the
/// lowercase hex digest.
///
/// Only one chunk is held in memory at a time. The chunk size has to match the
/// one given to the remote helper; the digest itself does not depend on it, but
/// both sides read and update in the same order.
pub fn hash_file(file: &Path, algorithm: HashAlgorithm, chunk_size: usize) -> io::Result<String> {
    let mut f = File::open(file)?;
    hash_reader(&mut f, algorithm, chunk_size)
}

pub fn hash_reader<R: Read>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    chunk_size: usize,
) -> io::Result<String> {
    let mut hasher = algorithm.new_digest();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = algorithm.new_digest();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_known_sha1_vector() {
        assert_eq!(
            hash_bytes(b"abc", HashAlgorithm::Sha1),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_known_md5_and_sha256_vectors() {
        assert_eq!(hash_bytes(b"", HashAlgorithm::Md5), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            hash_bytes(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let expected = hash_bytes(&data, HashAlgorithm::Sha1);
        assert_eq!(hash_file(&path, HashAlgorithm::Sha1, 7).unwrap(), expected);
        assert_eq!(hash_file(&path, HashAlgorithm::Sha1, DEFAULT_CHUNK_SIZE).unwrap(), expected);
        assert_eq!(hash_file(&path, HashAlgorithm::Sha1, 1 << 20).unwrap(), expected);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = tempdir().unwrap();
        let err = hash_file(&tmp.path().join("nope"), HashAlgorithm::Sha1, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
