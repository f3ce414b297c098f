//! Library instance binding and descriptor persistence.
//!
//! An [`Instance`] ties a library's base directory to the address of its
//! backing store. The binding is persisted as a small JSON descriptor at a
//! well-known name inside the base directory; every derived path in the
//! album tree resolves against the instance's base directory.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};
use rusqlite::Connection;

use crate::error::{LibraryError, Result};
use crate::session::Session;

/// Name of the descriptor file at every library root.
pub const DESCRIPTOR_FILE_NAME: &str = "fonoteca.json";

const DESCRIPTOR_VERSION: u32 = 1;
const MAX_IDLE_CONNECTIONS: usize = 4;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct Descriptor {
    store_address: String,
    version: u32,
}

/// The binding between a library's base directory and its backing store.
///
/// Construct one with [`Instance::initialize`] for a fresh library root or
/// [`Instance::from_path`] for an existing one, then open scoped sessions
/// with [`Instance::session`]. The base directory is canonicalized at
/// construction so relative paths never leak into derived-path computation.
///
/// The instance owns a small pool of idle store connections; each session
/// checks one out for its lifetime. The store address is handed to SQLite
/// unchanged — note that a plain `:memory:` address would give every
/// session its own private empty store, so libraries are expected to use
/// file-backed addresses.
pub struct Instance {
    base_dir: PathBuf,
    store_address: String,
    idle: Mutex<Vec<Connection>>,
}

impl Instance {
    fn new(base_dir: PathBuf, store_address: String) -> Self {
        Self {
            base_dir,
            store_address,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Creates the descriptor file at `base_dir` and returns the bound
    /// instance.
    ///
    /// Fails with [`LibraryError::Io`] if `base_dir` does not exist or is
    /// not writable.
    pub fn initialize(base_dir: &Path, store_address: &str) -> Result<Self> {
        let base_dir = base_dir.canonicalize()?;
        let instance = Self::new(base_dir, store_address.to_string());
        let descriptor = Descriptor {
            store_address: instance.store_address.clone(),
            version: DESCRIPTOR_VERSION,
        };
        let serialized = serde_json::to_string_pretty(&descriptor)?;
        std::fs::write(instance.descriptor_path(), serialized)?;
        info!(
            "Instance: initialized library at {} (store {})",
            instance.base_dir.display(),
            instance.store_address
        );
        Ok(instance)
    }

    /// Loads the descriptor at `base_dir` and returns the bound instance.
    ///
    /// A missing descriptor is [`LibraryError::DescriptorNotFound`], a
    /// descriptor of another version is [`LibraryError::DescriptorVersion`]
    /// (there is no forward-compatibility shim), and unparseable contents
    /// are [`LibraryError::DescriptorFormat`].
    pub fn from_path(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.canonicalize()?;
        let descriptor_path = base_dir.join(DESCRIPTOR_FILE_NAME);
        let contents = match std::fs::read_to_string(&descriptor_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LibraryError::DescriptorNotFound {
                    path: descriptor_path,
                });
            }
            Err(err) => return Err(err.into()),
        };
        let descriptor: Descriptor = serde_json::from_str(&contents)?;
        if descriptor.version != DESCRIPTOR_VERSION {
            return Err(LibraryError::DescriptorVersion {
                found: descriptor.version,
                expected: DESCRIPTOR_VERSION,
            });
        }
        info!(
            "Instance: opened library at {} (store {})",
            base_dir.display(),
            descriptor.store_address
        );
        Ok(Self::new(base_dir, descriptor.store_address))
    }

    /// Canonical root directory every derived path resolves against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Opaque connection string of the backing store.
    pub fn store_address(&self) -> &str {
        &self.store_address
    }

    /// Location of this instance's descriptor file.
    pub fn descriptor_path(&self) -> PathBuf {
        self.base_dir.join(DESCRIPTOR_FILE_NAME)
    }

    /// Runs `work` inside a scoped unit of work against the store.
    ///
    /// The session checks out one connection for its lifetime. When `work`
    /// returns `Ok` the session commits; on `Err` every change made inside
    /// it is rolled back and the error is re-raised. The connection is
    /// reclaimed on every exit path.
    ///
    /// Sessions are independent connections and the store runs at the
    /// weakest isolation level, so concurrent sessions may observe each
    /// other's uncommitted writes; within one session, reads always observe
    /// the session's own earlier writes.
    pub fn session<T>(&self, work: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let session = Session::begin(self)?;
        match work(&session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(err) => {
                session.rollback();
                Err(err)
            }
        }
    }

    pub(crate) fn checkout_connection(&self) -> Result<Connection> {
        let reused = self
            .idle
            .lock()
            .expect("idle connection pool lock poisoned")
            .pop();
        if let Some(conn) = reused {
            return Ok(conn);
        }
        debug!("Instance: opening store connection to {}", self.store_address);
        let conn = Connection::open(&self.store_address)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // Weakest available isolation; concurrent sessions may observe each
        // other's in-flight writes.
        conn.pragma_update(None, "read_uncommitted", true)?;
        Ok(conn)
    }

    pub(crate) fn reclaim_connection(&self, conn: Connection) {
        let mut idle = self
            .idle
            .lock()
            .expect("idle connection pool lock poisoned");
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("base_dir", &self.base_dir)
            .field("store_address", &self.store_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_then_from_path_round_trips_the_binding() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let created = Instance::initialize(dir.path(), "library.db")
            .expect("initialize should succeed in a writable directory");
        assert!(created.descriptor_path().is_file());

        let loaded = Instance::from_path(dir.path()).expect("descriptor should load back");
        assert_eq!(loaded.store_address(), "library.db");
        assert_eq!(loaded.base_dir(), created.base_dir());
        assert!(loaded.base_dir().is_absolute());
    }

    #[test]
    fn test_from_path_without_descriptor_is_not_found() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let result = Instance::from_path(dir.path());
        assert!(matches!(
            result,
            Err(LibraryError::DescriptorNotFound { .. })
        ));
    }

    #[test]
    fn test_from_path_rejects_future_descriptor_version() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE_NAME),
            r#"{"store_address": "library.db", "version": 2}"#,
        )
        .expect("failed to write descriptor");

        let result = Instance::from_path(dir.path());
        assert!(matches!(
            result,
            Err(LibraryError::DescriptorVersion {
                found: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn test_from_path_rejects_descriptor_without_version_field() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE_NAME),
            r#"{"store_address": "library.db"}"#,
        )
        .expect("failed to write descriptor");

        let result = Instance::from_path(dir.path());
        assert!(matches!(result, Err(LibraryError::DescriptorFormat(_))));
    }

    #[test]
    fn test_from_path_rejects_malformed_descriptor() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(dir.path().join(DESCRIPTOR_FILE_NAME), "not json at all")
            .expect("failed to write descriptor");

        let result = Instance::from_path(dir.path());
        assert!(matches!(result, Err(LibraryError::DescriptorFormat(_))));
    }

    #[test]
    fn test_initialize_in_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let missing = dir.path().join("no-such-subdir");
        let result = Instance::initialize(&missing, "library.db");
        assert!(matches!(result, Err(LibraryError::Io(_))));
    }
}
