//! Core data model and instance management for a file-backed music library.
//!
//! A library is a directory tree of audio files mirrored by an album tree
//! in a SQLite store, with covers, ratings, play counts, and a nested tag
//! taxonomy layered on top. This crate is the data layer underneath the
//! GUI and import tooling: it binds a base directory to its store
//! ([`Instance`]), opens scoped transactional sessions against it
//! ([`Session`]), derives filesystem paths from the album ancestor chain,
//! maps file paths back onto the tree (creating missing albums on the
//! way), and computes content digests for imported files
//! ([`hash_file`]).
//!
//! The store schema is owned by an external migration tool; this crate
//! assumes the schema it finds matches what it expects. Everything here is
//! synchronous and blocking — callers wanting concurrency open independent
//! sessions from independent threads.

mod error;
mod hash;
mod instance;
mod model;
mod session;

pub use error::{LibraryError, Result};
pub use hash::{hash_file, FileHash};
pub use instance::{Instance, DESCRIPTOR_FILE_NAME};
pub use model::{
    Album, AlbumId, Cover, CoverId, NewTrack, Tag, TagColor, TagId, Track, TrackId,
};
pub use session::Session;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::instance::Instance;

    /// DDL mirroring the schema the external migration tool maintains.
    const STORE_SCHEMA: &str = "
        CREATE TABLE album (
            id INTEGER PRIMARY KEY,
            parent_id INTEGER REFERENCES album (id),
            name TEXT NOT NULL
        );
        CREATE TABLE track (
            id INTEGER PRIMARY KEY,
            album_id INTEGER REFERENCES album (id),
            name TEXT NOT NULL,
            folder TEXT NOT NULL,
            extension TEXT NOT NULL,
            duration REAL NOT NULL,
            file_hash BLOB NOT NULL,
            file_size INTEGER NOT NULL,
            rating INTEGER,
            listenings INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE cover (
            id INTEGER PRIMARY KEY,
            album_id INTEGER REFERENCES album (id),
            name TEXT NOT NULL,
            folder TEXT NOT NULL,
            extension TEXT NOT NULL
        );
        CREATE TABLE tag (
            id INTEGER PRIMARY KEY,
            parent_id INTEGER REFERENCES tag (id),
            name TEXT NOT NULL,
            color BLOB
        );
        CREATE TABLE track_to_tags (
            track_id INTEGER NOT NULL REFERENCES track (id),
            tag_id INTEGER NOT NULL REFERENCES tag (id),
            PRIMARY KEY (track_id, tag_id)
        );
    ";

    /// Builds a schema-loaded library in a temporary directory. The tempdir
    /// guard must outlive the instance.
    pub(crate) fn temp_library() -> (tempfile::TempDir, Instance) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store_path = dir.path().join("library.db");
        let conn =
            rusqlite::Connection::open(&store_path).expect("failed to create the store file");
        conn.execute_batch(STORE_SCHEMA)
            .expect("failed to apply the store schema");
        let store_address = store_path
            .to_str()
            .expect("temp store path should be valid UTF-8");
        let instance = Instance::initialize(dir.path(), store_address)
            .expect("failed to initialize the library instance");
        (dir, instance)
    }
}
