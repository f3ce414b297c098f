//! Library entities and their derived attributes.
//!
//! Albums form a tree mirroring the folder hierarchy under the library's
//! base directory; tracks and covers hang off an optional album; tags form
//! an independent tree. Filesystem paths and folder strings are never
//! stored for tree nodes — they are recomputed from the ancestor chain and
//! the instance's base directory on every call, so they always reflect the
//! latest store state. Derivation takes the session explicitly; entities
//! hold no back-references.

use std::fmt;
use std::path::PathBuf;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use crate::error::Result;
use crate::hash::FileHash;
use crate::session::Session;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

row_id!(
    /// Row id of an album.
    AlbumId
);
row_id!(
    /// Row id of a track.
    TrackId
);
row_id!(
    /// Row id of a cover.
    CoverId
);
row_id!(
    /// Row id of a tag.
    TagId
);

/// A folder-equivalent node in the album tree.
///
/// `name` is a single path segment; siblings of the same parent carry
/// distinct names by construction of the reverse resolver. Root albums have
/// no parent. Children are found by querying on `parent_id`, so the two
/// sides of the relation cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub id: AlbumId,
    pub parent_id: Option<AlbumId>,
    pub name: String,
}

impl Album {
    /// Filesystem path of this album: `parent.path / name`, grounded at the
    /// instance's base directory.
    pub fn path(&self, session: &Session<'_>) -> Result<PathBuf> {
        match self.parent_id {
            Some(parent_id) => Ok(session.album(parent_id)?.path(session)?.join(&self.name)),
            None => Ok(session.instance().base_dir().join(&self.name)),
        }
    }

    /// `/`-joined folder string of this album: `parent.folder + "/" + name`,
    /// or the bare name at the root.
    pub fn folder(&self, session: &Session<'_>) -> Result<String> {
        match self.parent_id {
            Some(parent_id) => Ok(format!(
                "{}/{}",
                session.album(parent_id)?.folder(session)?,
                self.name
            )),
            None => Ok(self.name.clone()),
        }
    }
}

/// An audio file in the library.
///
/// `extension` keeps its leading dot so `name + extension` reconstructs the
/// file name. `folder` is denormalized from the album chain and re-synced
/// whenever the track's album changes. `file_hash` and `file_size` together
/// identify the on-disk content; hash uniqueness is deliberately not
/// enforced (de-duplication is a caller policy).
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub album_id: Option<AlbumId>,
    pub name: String,
    pub folder: String,
    pub extension: String,
    pub duration: f64,
    pub file_hash: FileHash,
    pub file_size: i64,
    pub rating: Option<i32>,
    pub listenings: i64,
}

impl Track {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Filesystem path of this track: the album path (or the base directory
    /// for album-less tracks) joined with the file name.
    pub fn path(&self, session: &Session<'_>) -> Result<PathBuf> {
        match self.album_id {
            Some(album_id) => Ok(session
                .album(album_id)?
                .path(session)?
                .join(self.file_name())),
            None => Ok(session.instance().base_dir().join(self.file_name())),
        }
    }
}

/// Fields for inserting a new track; the id, folder, and play counter are
/// assigned by the session at insert time.
#[derive(Debug, Clone)]
pub struct NewTrack<'a> {
    pub name: &'a str,
    pub extension: &'a str,
    pub album: Option<&'a Album>,
    pub duration: f64,
    pub file_hash: FileHash,
    pub file_size: i64,
    pub rating: Option<i32>,
}

/// An image file attached to an optional album.
#[derive(Debug, Clone, PartialEq)]
pub struct Cover {
    pub id: CoverId,
    pub album_id: Option<AlbumId>,
    pub name: String,
    pub folder: String,
    pub extension: String,
}

impl Cover {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Same derivation rule as [`Track::path`].
    pub fn path(&self, session: &Session<'_>) -> Result<PathBuf> {
        match self.album_id {
            Some(album_id) => Ok(session
                .album(album_id)?
                .path(session)?
                .join(self.file_name())),
            None => Ok(session.instance().base_dir().join(self.file_name())),
        }
    }
}

/// A label attachable to tracks, optionally nested into a taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: TagId,
    pub parent_id: Option<TagId>,
    pub name: String,
    pub color: Option<TagColor>,
}

/// RGB color assigned to a tag, stored as a 3-byte BLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl TagColor {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            red: bytes[0],
            green: bytes[1],
            blue: bytes[2],
        }
    }

    pub fn as_bytes(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

impl ToSql for TagColor {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_bytes().to_vec()))
    }
}

impl FromSql for TagColor {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 3] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 3,
            blob_size: blob.len(),
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_color_byte_round_trip() {
        let color = TagColor::new(0x20, 0x90, 0xff);
        assert_eq!(color.as_bytes(), [0x20, 0x90, 0xff]);
        assert_eq!(TagColor::from_bytes(color.as_bytes()), color);
    }

    #[test]
    fn test_track_file_name_joins_extension() {
        let track = Track {
            id: TrackId(1),
            album_id: None,
            name: "Bohemian Rhapsody".to_string(),
            folder: String::new(),
            extension: ".mp3".to_string(),
            duration: 354.0,
            file_hash: FileHash::from_bytes([0; 32]),
            file_size: 8_500_000,
            rating: None,
            listenings: 0,
        };
        assert_eq!(track.file_name(), "Bohemian Rhapsody.mp3");
    }

    #[test]
    fn test_row_id_display_is_plain_integer() {
        assert_eq!(AlbumId(42).to_string(), "42");
        assert_eq!(TagId(7).to_string(), "7");
    }
}
