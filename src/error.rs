//! Error types shared across the library core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;

/// Errors surfaced by the library core.
///
/// Callers are expected to branch on [`LibraryError::DescriptorNotFound`]
/// (e.g. to offer creating a new library); the remaining kinds are fatal to
/// the operation that produced them.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// I/O failure while hashing a file or touching the instance descriptor.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store operation failure (wraps `rusqlite::Error`).
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// No instance descriptor exists at the given library root.
    #[error("no library descriptor found at {path}")]
    DescriptorNotFound { path: PathBuf },

    /// The descriptor parsed but carries a version this code does not speak.
    #[error("library descriptor version {found} is not supported (expected {expected})")]
    DescriptorVersion { found: u32, expected: u32 },

    /// The descriptor file exists but is not a valid descriptor record.
    #[error("malformed library descriptor: {0}")]
    DescriptorFormat(#[from] serde_json::Error),

    /// A path handed to the resolver does not live under the library root.
    #[error("path {path} is outside the library root {base_dir}")]
    OutsideLibrary { path: PathBuf, base_dir: PathBuf },
}
