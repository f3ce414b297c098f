//! Scoped units of work against the library store.
//!
//! A [`Session`] is created by [`Instance::session`] and lives for exactly
//! one closure invocation: a connection is checked out of the instance's
//! pool, a transaction is opened, and on exit the work either commits as a
//! whole or rolls back as a whole. All entity reads and writes are methods
//! on the session, so nothing can touch the store outside a transaction.

use std::path::Path;

use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{LibraryError, Result};
use crate::hash::FileHash;
use crate::instance::Instance;
use crate::model::{
    Album, AlbumId, Cover, CoverId, NewTrack, Tag, TagColor, TagId, Track, TrackId,
};

/// A unit of work holding one store connection for its lifetime.
///
/// Dropping a session that was neither committed nor rolled back rolls it
/// back; the connection is reclaimed by the owning instance on every exit
/// path.
pub struct Session<'a> {
    instance: &'a Instance,
    conn: Option<Connection>,
    open: bool,
}

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        album_id: row.get(1)?,
        name: row.get(2)?,
        folder: row.get(3)?,
        extension: row.get(4)?,
        duration: row.get(5)?,
        file_hash: row.get(6)?,
        file_size: row.get(7)?,
        rating: row.get(8)?,
        listenings: row.get(9)?,
    })
}

fn cover_from_row(row: &Row<'_>) -> rusqlite::Result<Cover> {
    Ok(Cover {
        id: row.get(0)?,
        album_id: row.get(1)?,
        name: row.get(2)?,
        folder: row.get(3)?,
        extension: row.get(4)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
    })
}

impl<'a> Session<'a> {
    pub(crate) fn begin(instance: &'a Instance) -> Result<Self> {
        let conn = instance.checkout_connection()?;
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            instance,
            conn: Some(conn),
            open: true,
        })
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        self.conn().execute_batch("COMMIT")?;
        self.open = false;
        debug!("Session: committed");
        Ok(())
    }

    /// Discards the unit of work; the drop handler rolls the transaction
    /// back and reclaims the connection.
    pub(crate) fn rollback(self) {}

    /// The instance this session belongs to; derived-path computation
    /// resolves the base directory through it.
    pub fn instance(&self) -> &Instance {
        self.instance
    }

    fn conn(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("session connection present until drop")
    }

    /// Inserts a new album under `parent` (or at the root).
    pub fn create_album(&self, name: &str, parent: Option<&Album>) -> Result<Album> {
        let parent_id = parent.map(|album| album.id);
        self.conn().execute(
            "INSERT INTO album (parent_id, name) VALUES (?1, ?2)",
            params![parent_id, name],
        )?;
        let id = AlbumId(self.conn().last_insert_rowid());
        debug!("Session: created album {:?} (id {})", name, id);
        Ok(Album {
            id,
            parent_id,
            name: name.to_string(),
        })
    }

    /// Fetches an album by id; a missing row surfaces as
    /// `QueryReturnedNoRows` through [`LibraryError::Store`].
    pub fn album(&self, id: AlbumId) -> Result<Album> {
        Ok(self.conn().query_row(
            "SELECT id, parent_id, name FROM album WHERE id = ?1",
            params![id],
            album_from_row,
        )?)
    }

    /// Looks up an album by name under `parent` (or among the roots).
    pub fn find_album(&self, parent: Option<AlbumId>, name: &str) -> Result<Option<Album>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, parent_id, name FROM album WHERE parent_id IS ?1 AND name = ?2",
                params![parent, name],
                album_from_row,
            )
            .optional()?)
    }

    /// Children of `parent`, or the root albums for `None`, ordered by name.
    pub fn child_albums(&self, parent: Option<AlbumId>) -> Result<Vec<Album>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, parent_id, name FROM album WHERE parent_id IS ?1 ORDER BY name",
        )?;
        let albums = stmt
            .query_map(params![parent], album_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    pub fn root_albums(&self) -> Result<Vec<Album>> {
        self.child_albums(None)
    }

    /// Resolves the album for a file at `path`, creating missing ancestors.
    ///
    /// `path` must be an absolute path under the instance's base directory;
    /// anything else fails with [`LibraryError::OutsideLibrary`] without
    /// creating a row. The final segment is the file's own name and never
    /// becomes an album. Each missing folder segment is inserted as it is
    /// walked, so a second resolution of the same path reuses every node.
    /// Returns `None` for a file sitting directly in the base directory.
    pub fn album_for_file(&self, path: &Path) -> Result<Option<Album>> {
        let relative = path.strip_prefix(self.instance.base_dir()).map_err(|_| {
            LibraryError::OutsideLibrary {
                path: path.to_path_buf(),
                base_dir: self.instance.base_dir().to_path_buf(),
            }
        })?;
        let Some(folders) = relative.parent() else {
            return Ok(None);
        };
        let mut album: Option<Album> = None;
        for component in folders.components() {
            let std::path::Component::Normal(segment) = component else {
                continue;
            };
            let name = segment.to_string_lossy();
            let parent_id = album.as_ref().map(|parent| parent.id);
            album = Some(match self.find_album(parent_id, &name)? {
                Some(existing) => existing,
                None => self.create_album(&name, album.as_ref())?,
            });
        }
        Ok(album)
    }

    /// All album ids in the subtree rooted at `root`, including `root`
    /// itself. Computed with a recursive closure query, so the tree depth
    /// is unbounded.
    pub fn album_subtree(&self, root: AlbumId) -> Result<Vec<AlbumId>> {
        let mut stmt = self.conn().prepare(
            "WITH RECURSIVE subtree (id) AS (
                 SELECT id FROM album WHERE id = ?1
                 UNION ALL
                 SELECT album.id FROM album JOIN subtree ON album.parent_id = subtree.id
             )
             SELECT id FROM subtree",
        )?;
        let ids = stmt
            .query_map(params![root], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Inserts a new track. The denormalized `folder` column is derived
    /// from the album chain at insert time; the play counter starts at 0.
    pub fn add_track(&self, new: NewTrack<'_>) -> Result<Track> {
        let folder = match new.album {
            Some(album) => album.folder(self)?,
            None => String::new(),
        };
        self.conn().execute(
            "INSERT INTO track (album_id, name, folder, extension, duration, file_hash, file_size, rating, listenings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                new.album.map(|album| album.id),
                new.name,
                folder,
                new.extension,
                new.duration,
                new.file_hash,
                new.file_size,
                new.rating,
            ],
        )?;
        let id = TrackId(self.conn().last_insert_rowid());
        debug!("Session: added track {:?} (id {})", new.name, id);
        Ok(Track {
            id,
            album_id: new.album.map(|album| album.id),
            name: new.name.to_string(),
            folder,
            extension: new.extension.to_string(),
            duration: new.duration,
            file_hash: new.file_hash,
            file_size: new.file_size,
            rating: new.rating,
            listenings: 0,
        })
    }

    pub fn track(&self, id: TrackId) -> Result<Track> {
        Ok(self.conn().query_row(
            "SELECT id, album_id, name, folder, extension, duration, file_hash, file_size, rating, listenings
             FROM track WHERE id = ?1",
            params![id],
            track_from_row,
        )?)
    }

    /// Tracks attached to `album`, or the album-less tracks for `None`.
    pub fn tracks_in_album(&self, album: Option<AlbumId>) -> Result<Vec<Track>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, album_id, name, folder, extension, duration, file_hash, file_size, rating, listenings
             FROM track WHERE album_id IS ?1 ORDER BY name",
        )?;
        let tracks = stmt
            .query_map(params![album], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    pub fn all_tracks(&self) -> Result<Vec<Track>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, album_id, name, folder, extension, duration, file_hash, file_size, rating, listenings
             FROM track ORDER BY folder, name",
        )?;
        let tracks = stmt
            .query_map([], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    /// Tracks whose content digest equals `hash`. Duplicate content is
    /// legal in the store; callers use this for their own de-dup policy.
    pub fn tracks_with_hash(&self, hash: &FileHash) -> Result<Vec<Track>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, album_id, name, folder, extension, duration, file_hash, file_size, rating, listenings
             FROM track WHERE file_hash = ?1 ORDER BY folder, name",
        )?;
        let tracks = stmt
            .query_map(params![hash], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    pub fn set_rating(&self, track: TrackId, rating: Option<i32>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE track SET rating = ?1 WHERE id = ?2",
            params![rating, track],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }
        Ok(())
    }

    /// Increments the track's play counter by one.
    pub fn record_listening(&self, track: TrackId) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE track SET listenings = listenings + 1 WHERE id = ?1",
            params![track],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }
        Ok(())
    }

    /// Moves a track to `album` (or to the library root for `None`),
    /// re-syncing the denormalized folder column.
    pub fn set_track_album(&self, track: TrackId, album: Option<&Album>) -> Result<()> {
        let folder = match album {
            Some(album) => album.folder(self)?,
            None => String::new(),
        };
        let updated = self.conn().execute(
            "UPDATE track SET album_id = ?1, folder = ?2 WHERE id = ?3",
            params![album.map(|album| album.id), folder, track],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }
        Ok(())
    }

    pub fn add_cover(
        &self,
        name: &str,
        extension: &str,
        album: Option<&Album>,
    ) -> Result<Cover> {
        let folder = match album {
            Some(album) => album.folder(self)?,
            None => String::new(),
        };
        self.conn().execute(
            "INSERT INTO cover (album_id, name, folder, extension) VALUES (?1, ?2, ?3, ?4)",
            params![album.map(|album| album.id), name, folder, extension],
        )?;
        let id = CoverId(self.conn().last_insert_rowid());
        debug!("Session: added cover {:?} (id {})", name, id);
        Ok(Cover {
            id,
            album_id: album.map(|album| album.id),
            name: name.to_string(),
            folder,
            extension: extension.to_string(),
        })
    }

    pub fn cover(&self, id: CoverId) -> Result<Cover> {
        Ok(self.conn().query_row(
            "SELECT id, album_id, name, folder, extension FROM cover WHERE id = ?1",
            params![id],
            cover_from_row,
        )?)
    }

    pub fn covers_in_album(&self, album: Option<AlbumId>) -> Result<Vec<Cover>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, album_id, name, folder, extension FROM cover
             WHERE album_id IS ?1 ORDER BY name",
        )?;
        let covers = stmt
            .query_map(params![album], cover_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(covers)
    }

    pub fn create_tag(
        &self,
        name: &str,
        parent: Option<&Tag>,
        color: Option<TagColor>,
    ) -> Result<Tag> {
        let parent_id = parent.map(|tag| tag.id);
        self.conn().execute(
            "INSERT INTO tag (parent_id, name, color) VALUES (?1, ?2, ?3)",
            params![parent_id, name, color],
        )?;
        let id = TagId(self.conn().last_insert_rowid());
        debug!("Session: created tag {:?} (id {})", name, id);
        Ok(Tag {
            id,
            parent_id,
            name: name.to_string(),
            color,
        })
    }

    pub fn tag(&self, id: TagId) -> Result<Tag> {
        Ok(self.conn().query_row(
            "SELECT id, parent_id, name, color FROM tag WHERE id = ?1",
            params![id],
            tag_from_row,
        )?)
    }

    pub fn all_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, parent_id, name, color FROM tag ORDER BY name")?;
        let tags = stmt
            .query_map([], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Children of `parent` in the tag taxonomy, or the root tags for
    /// `None`, ordered by name.
    pub fn child_tags(&self, parent: Option<TagId>) -> Result<Vec<Tag>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, parent_id, name, color FROM tag WHERE parent_id IS ?1 ORDER BY name",
        )?;
        let tags = stmt
            .query_map(params![parent], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn set_tag_color(&self, tag: TagId, color: Option<TagColor>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tag SET color = ?1 WHERE id = ?2",
            params![color, tag],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }
        Ok(())
    }

    /// Attaches `tag` to `track`; attaching an already-attached pair is a
    /// no-op.
    pub fn tag_track(&self, track: TrackId, tag: TagId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO track_to_tags (track_id, tag_id) VALUES (?1, ?2)",
            params![track, tag],
        )?;
        Ok(())
    }

    /// Detaches `tag` from `track`; detaching an absent pair is a no-op.
    pub fn untag_track(&self, track: TrackId, tag: TagId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM track_to_tags WHERE track_id = ?1 AND tag_id = ?2",
            params![track, tag],
        )?;
        Ok(())
    }

    pub fn tags_for_track(&self, track: TrackId) -> Result<Vec<Tag>> {
        let mut stmt = self.conn().prepare(
            "SELECT tag.id, tag.parent_id, tag.name, tag.color FROM tag
             JOIN track_to_tags ON track_to_tags.tag_id = tag.id
             WHERE track_to_tags.track_id = ?1 ORDER BY tag.name",
        )?;
        let tags = stmt
            .query_map(params![track], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn tracks_for_tag(&self, tag: TagId) -> Result<Vec<Track>> {
        let mut stmt = self.conn().prepare(
            "SELECT track.id, track.album_id, track.name, track.folder, track.extension,
                    track.duration, track.file_hash, track.file_size, track.rating, track.listenings
             FROM track
             JOIN track_to_tags ON track_to_tags.track_id = track.id
             WHERE track_to_tags.tag_id = ?1 ORDER BY track.folder, track.name",
        )?;
        let tracks = stmt
            .query_map(params![tag], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    /// All tag ids in the subtree rooted at `root`, including `root`
    /// itself.
    pub fn tag_subtree(&self, root: TagId) -> Result<Vec<TagId>> {
        let mut stmt = self.conn().prepare(
            "WITH RECURSIVE subtree (id) AS (
                 SELECT id FROM tag WHERE id = ?1
                 UNION ALL
                 SELECT tag.id FROM tag JOIN subtree ON tag.parent_id = subtree.id
             )
             SELECT id FROM subtree",
        )?;
        let ids = stmt
            .query_map(params![root], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Tracks carrying `tag` or any tag in its subtree.
    pub fn tracks_tagged_within(&self, tag: TagId) -> Result<Vec<Track>> {
        let mut stmt = self.conn().prepare(
            "WITH RECURSIVE subtree (id) AS (
                 SELECT id FROM tag WHERE id = ?1
                 UNION ALL
                 SELECT tag.id FROM tag JOIN subtree ON tag.parent_id = subtree.id
             )
             SELECT DISTINCT track.id, track.album_id, track.name, track.folder, track.extension,
                    track.duration, track.file_hash, track.file_size, track.rating, track.listenings
             FROM track
             JOIN track_to_tags ON track_to_tags.track_id = track.id
             JOIN subtree ON track_to_tags.tag_id = subtree.id
             ORDER BY track.folder, track.name",
        )?;
        let tracks = stmt
            .query_map(params![tag], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.open {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!("Session: rollback failed, discarding connection: {}", err);
                return;
            }
            self.open = false;
            debug!("Session: rolled back");
        }
        self.instance.reclaim_connection(conn);
    }
}
