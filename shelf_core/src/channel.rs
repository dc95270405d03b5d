//! Channel databases.
//!
//! Every channel is its own SQLite database holding the content tree, the
//! prerequisite and related edges, formats and files. Traversal lives in
//! `traverse.rs` and edge mutation in `edges.rs`, both as further `impl
//! ChannelDb` blocks.

use crate::config::CyclePolicy;
use crate::error::{Error, Result};
use crate::model::{
    ChannelId, ChannelMetadata, ContentId, ContentKind, ContentMetadata, File, Format, License,
    MimeType,
};
use crate::reference::ContentRef;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Columns selected for a content node, joined with its license.
pub(crate) const CONTENT_SELECT: &str = "SELECT c.id, c.content_id, c.title, c.description, c.kind, \
     c.slug, c.parent_id, c.sort_order, l.id, l.license_name \
     FROM content_metadata c LEFT JOIN license l ON l.id = c.license_id";

/// Columns selected for a format, joined with its mimetype.
pub(crate) const FORMAT_SELECT: &str = "SELECT f.id, f.contentmetadata_id, f.quality, \
     f.format_size, m.id, m.readable_name \
     FROM format f LEFT JOIN mimetype m ON m.id = f.mimetype_id";

pub(crate) const FILE_SELECT: &str =
    "SELECT fl.id, fl.format_id, fl.checksum, fl.extension, fl.file_size, fl.content_copy FROM file fl";

/// One channel's content database.
///
/// Thread-safe via an internal mutex on the connection.
pub struct ChannelDb {
    channel_id: ChannelId,
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    cycle_policy: CyclePolicy,
}

impl std::fmt::Debug for ChannelDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDb")
            .field("channel_id", &self.channel_id)
            .field("path", &self.path)
            .field("cycle_policy", &self.cycle_policy)
            .finish()
    }
}

impl ChannelDb {
    /// Open or create the database file for a channel.
    pub fn open(channel_id: ChannelId, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init_schema(&conn)?;
        debug!(channel = %channel_id, path = %path.display(), "opened channel database");

        Ok(Self {
            channel_id,
            path: Some(path),
            conn: Mutex::new(conn),
            cycle_policy: CyclePolicy::default(),
        })
    }

    /// Create an in-memory channel database (useful for testing).
    pub fn open_in_memory(channel_id: ChannelId) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            channel_id,
            path: None,
            conn: Mutex::new(conn),
            cycle_policy: CyclePolicy::default(),
        })
    }

    /// Set how `set_prerequisite` checks for cycles.
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS channel_metadata (
                channel_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 0,
                root_content_id TEXT
            );

            CREATE TABLE IF NOT EXISTS license (
                id INTEGER PRIMARY KEY,
                license_name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS mimetype (
                id INTEGER PRIMARY KEY,
                readable_name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS content_metadata (
                id INTEGER PRIMARY KEY,
                content_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL,
                slug TEXT NOT NULL DEFAULT '',
                parent_id INTEGER REFERENCES content_metadata(id),
                sort_order REAL NOT NULL DEFAULT 0,
                license_id INTEGER REFERENCES license(id)
            );

            CREATE INDEX IF NOT EXISTS idx_content_parent
                ON content_metadata(parent_id, sort_order, id);

            -- target_id requires prerequisite_id
            CREATE TABLE IF NOT EXISTS prerequisite (
                id INTEGER PRIMARY KEY,
                target_id INTEGER NOT NULL REFERENCES content_metadata(id),
                prerequisite_id INTEGER NOT NULL REFERENCES content_metadata(id),
                CHECK (target_id <> prerequisite_id),
                UNIQUE (target_id, prerequisite_id)
            );

            -- both directions are stored; declared = 0 marks the mirror row
            CREATE TABLE IF NOT EXISTS related (
                id INTEGER PRIMARY KEY,
                content_1_id INTEGER NOT NULL REFERENCES content_metadata(id),
                content_2_id INTEGER NOT NULL REFERENCES content_metadata(id),
                declared INTEGER NOT NULL,
                CHECK (content_1_id <> content_2_id),
                UNIQUE (content_1_id, content_2_id)
            );

            CREATE TABLE IF NOT EXISTS format (
                id INTEGER PRIMARY KEY,
                contentmetadata_id INTEGER NOT NULL REFERENCES content_metadata(id),
                quality TEXT NOT NULL,
                format_size INTEGER NOT NULL DEFAULT 0,
                mimetype_id INTEGER REFERENCES mimetype(id)
            );

            CREATE INDEX IF NOT EXISTS idx_format_content
                ON format(contentmetadata_id);

            CREATE TABLE IF NOT EXISTS file (
                id INTEGER PRIMARY KEY,
                format_id INTEGER NOT NULL REFERENCES format(id),
                checksum TEXT,
                extension TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                content_copy TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_file_format ON file(format_id);
            "#,
        )?;
        Ok(())
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Database file, `None` for in-memory channels.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn cycle_policy(&self) -> CyclePolicy {
        self.cycle_policy
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock()?)
    }

    // === Channel metadata ===

    pub fn metadata(&self) -> Result<Option<ChannelMetadata>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT channel_id, name, description, author, version, root_content_id \
                 FROM channel_metadata LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(channel_id, name, description, author, version, root)| {
            Ok(ChannelMetadata {
                channel_id: ChannelId::new(channel_id)?,
                name,
                description,
                author,
                version,
                root: root.map(|r| r.parse()).transpose()?,
            })
        })
        .transpose()
    }

    pub fn save_metadata(&self, metadata: &ChannelMetadata) -> Result<()> {
        let conn = self.conn()?;
        save_metadata_row(&conn, metadata)
    }

    // === Import primitives ===

    pub fn insert_license(&self, license: &License) -> Result<()> {
        let conn = self.conn()?;
        insert_license_row(&conn, license)
    }

    pub fn insert_mimetype(&self, mimetype: &MimeType) -> Result<()> {
        let conn = self.conn()?;
        insert_mimetype_row(&conn, mimetype)
    }

    pub fn insert_content(&self, node: &ContentMetadata) -> Result<()> {
        let conn = self.conn()?;
        insert_content_row(&conn, node)
    }

    pub fn insert_format(&self, format: &Format) -> Result<()> {
        let conn = self.conn()?;
        insert_format_row(&conn, format)
    }

    pub fn insert_file(&self, file: &File) -> Result<()> {
        let conn = self.conn()?;
        insert_file_row(&conn, file)
    }

    // === Lookups ===

    /// Resolve a reference to the node stored in this channel.
    pub fn resolve(&self, content: &ContentRef) -> Result<ContentMetadata> {
        let conn = self.conn()?;
        resolve(&conn, content)
    }

    /// Number of content nodes in the channel.
    pub fn content_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM content_metadata", [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }

    /// The channel root, if the channel has been imported.
    pub fn root(&self) -> Result<Option<ContentMetadata>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE c.parent_id IS NULL ORDER BY c.id LIMIT 1", CONTENT_SELECT);
        Ok(conn.query_row(&sql, [], row_to_content).optional()?)
    }

    pub fn file(&self, id: i64) -> Result<File> {
        let conn = self.conn()?;
        file_by_row(&conn, id)
    }

    /// All File rows that currently hold a content copy.
    pub fn files_with_content_copy(&self) -> Result<Vec<File>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE fl.content_copy IS NOT NULL ORDER BY fl.id", FILE_SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map([], row_to_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Write the content-copy columns of `updated` to its File row and
    /// return the row as it was before.
    ///
    /// Read and write happen under one lock, so concurrent swaps of the same
    /// row each see the copy the other left behind.
    pub(crate) fn swap_file_copy(&self, updated: &File) -> Result<File> {
        let conn = self.conn()?;
        let previous = file_by_row(&conn, updated.id)?;

        conn.execute(
            "UPDATE file SET checksum = ?1, extension = ?2, content_copy = ?3 WHERE id = ?4",
            params![
                updated.checksum,
                updated.extension,
                updated.content_copy,
                updated.id
            ],
        )?;
        debug!(file = updated.id, content_copy = ?updated.content_copy, "updated file row");
        Ok(previous)
    }
}

// === Row helpers shared by the impl blocks ===

pub(crate) fn resolve(conn: &Connection, content: &ContentRef) -> Result<ContentMetadata> {
    let content_id = content.content_id();
    let sql = format!("{} WHERE c.content_id = ?1", CONTENT_SELECT);
    conn.query_row(&sql, params![content_id.to_hex()], row_to_content)
        .optional()?
        .ok_or_else(|| Error::content_not_found(content_id.to_string()))
}

pub(crate) fn content_by_row(conn: &Connection, id: i64) -> Result<ContentMetadata> {
    let sql = format!("{} WHERE c.id = ?1", CONTENT_SELECT);
    conn.query_row(&sql, params![id], row_to_content)
        .optional()?
        .ok_or_else(|| Error::content_not_found(format!("row {}", id)))
}

pub(crate) fn file_by_row(conn: &Connection, id: i64) -> Result<File> {
    let sql = format!("{} WHERE fl.id = ?1", FILE_SELECT);
    conn.query_row(&sql, params![id], row_to_file)
        .optional()?
        .ok_or_else(|| Error::file_not_found(id))
}

pub(crate) fn row_to_content(row: &Row<'_>) -> rusqlite::Result<ContentMetadata> {
    let content_id: String = row.get(1)?;
    let kind: String = row.get(4)?;
    let license = match (row.get::<_, Option<i64>>(8)?, row.get::<_, Option<String>>(9)?) {
        (Some(id), Some(license_name)) => Some(License { id, license_name }),
        _ => None,
    };

    Ok(ContentMetadata {
        id: row.get(0)?,
        content_id: content_id
            .parse::<ContentId>()
            .map_err(|e| conversion_error(1, e))?,
        title: row.get(2)?,
        description: row.get(3)?,
        kind: ContentKind::parse(&kind).map_err(|e| conversion_error(4, e))?,
        slug: row.get(5)?,
        parent: row.get(6)?,
        sort_order: row.get(7)?,
        license,
    })
}

pub(crate) fn row_to_format(row: &Row<'_>) -> rusqlite::Result<Format> {
    let mimetype = match (row.get::<_, Option<i64>>(4)?, row.get::<_, Option<String>>(5)?) {
        (Some(id), Some(readable_name)) => Some(MimeType { id, readable_name }),
        _ => None,
    };

    Ok(Format {
        id: row.get(0)?,
        content: row.get(1)?,
        quality: row.get(2)?,
        format_size: row.get(3)?,
        mimetype,
    })
}

pub(crate) fn row_to_file(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        format: row.get(1)?,
        checksum: row.get(2)?,
        extension: row.get(3)?,
        file_size: row.get(4)?,
        content_copy: row.get(5)?,
    })
}

fn conversion_error(idx: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn save_metadata_row(conn: &Connection, metadata: &ChannelMetadata) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO channel_metadata (channel_id, name, description, author, version, root_content_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(channel_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            author = excluded.author,
            version = excluded.version,
            root_content_id = excluded.root_content_id
        "#,
        params![
            metadata.channel_id.as_str(),
            metadata.name,
            metadata.description,
            metadata.author,
            metadata.version,
            metadata.root.map(|r| r.to_hex()),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_license_row(conn: &Connection, license: &License) -> Result<()> {
    conn.execute(
        "INSERT INTO license (id, license_name) VALUES (?1, ?2)",
        params![license.id, license.license_name],
    )?;
    Ok(())
}

pub(crate) fn insert_mimetype_row(conn: &Connection, mimetype: &MimeType) -> Result<()> {
    conn.execute(
        "INSERT INTO mimetype (id, readable_name) VALUES (?1, ?2)",
        params![mimetype.id, mimetype.readable_name],
    )?;
    Ok(())
}

pub(crate) fn insert_content_row(conn: &Connection, node: &ContentMetadata) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO content_metadata
            (id, content_id, title, description, kind, slug, parent_id, sort_order, license_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            node.id,
            node.content_id.to_hex(),
            node.title,
            node.description,
            node.kind.as_str(),
            node.slug,
            node.parent,
            node.sort_order,
            node.license.as_ref().map(|l| l.id),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_format_row(conn: &Connection, format: &Format) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO format (id, contentmetadata_id, quality, format_size, mimetype_id)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            format.id,
            format.content,
            format.quality,
            format.format_size,
            format.mimetype.as_ref().map(|m| m.id),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_file_row(conn: &Connection, file: &File) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO file (id, format_id, checksum, extension, file_size, content_copy)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            file.id,
            file.format,
            file.checksum,
            file.extension,
            file.file_size,
            file.content_copy,
        ],
    )?;
    Ok(())
}
