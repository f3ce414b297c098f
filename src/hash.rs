//! Whole-file content hashing.
//!
//! Import tooling identifies a track by the SHA-256 digest of its full byte
//! stream plus its size. Files are read in bounded chunks so large media
//! files never have to fit in memory.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use sha2::{Digest, Sha256};

use crate::error::Result;

const READ_CHUNK_BYTES: usize = 1 << 20;

/// 256-bit digest of a file's full contents.
///
/// Stored as a 32-byte BLOB; displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHash([u8; 32]);

impl FileHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", self)
    }
}

impl ToSql for FileHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for FileHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 32] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 32,
            blob_size: blob.len(),
        })?;
        Ok(Self(bytes))
    }
}

/// Computes the content digest of the file at `path`.
///
/// Fails with [`crate::LibraryError::Io`] if the file cannot be opened or a
/// read fails mid-stream; a partial digest is never returned.
pub fn hash_file(path: &Path) -> Result<FileHash> {
    let file = File::open(path)?;
    hash_reader(file)
}

fn hash_reader<R: Read>(mut reader: R) -> Result<FileHash> {
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => hasher.update(&chunk[..read]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(FileHash(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibraryError;

    fn write_fixture(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("fixture.bin");
        std::fs::write(&path, contents).expect("failed to write fixture");
        (dir, path)
    }

    #[test]
    fn test_hash_matches_single_shot_digest() {
        let contents = b"forty-five minutes of tape hiss";
        let (_dir, path) = write_fixture(contents);

        let hashed = hash_file(&path).expect("hashing should succeed");
        let expected: [u8; 32] = Sha256::digest(contents).into();
        assert_eq!(hashed.as_bytes(), &expected);
    }

    #[test]
    fn test_hash_is_chunking_independent() {
        // Larger than READ_CHUNK_BYTES so the streaming loop takes several
        // iterations, including a final partial chunk.
        let contents: Vec<u8> = (0..3 * READ_CHUNK_BYTES + 7)
            .map(|i| (i % 251) as u8)
            .collect();
        let (_dir, path) = write_fixture(&contents);

        let streamed = hash_file(&path).expect("hashing should succeed");
        let expected: [u8; 32] = Sha256::digest(&contents).into();
        assert_eq!(streamed.as_bytes(), &expected);
        assert_eq!(
            streamed,
            hash_file(&path).expect("second hashing should succeed")
        );
    }

    #[test]
    fn test_hash_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let result = hash_file(&dir.path().join("does-not-exist.flac"));
        assert!(matches!(result, Err(LibraryError::Io(_))));
    }

    #[test]
    fn test_hash_display_is_lowercase_hex() {
        let hash = FileHash::from_bytes([0xAB; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }
}
