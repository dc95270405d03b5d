//! Prerequisite and related edges between content nodes.

use crate::channel::{self, CONTENT_SELECT, ChannelDb, row_to_content};
use crate::config::CyclePolicy;
use crate::error::{Error, Result};
use crate::model::ContentMetadata;
use crate::reference::ContentRef;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use tracing::debug;

/// Result of an edge write that may be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChange {
    Created,
    /// The edge already exists as the mirror of a declared edge.
    Unchanged,
}

impl ChannelDb {
    /// Record that `prerequisite` must be completed before `content`.
    pub fn set_prerequisite(&self, prerequisite: &ContentRef, content: &ContentRef) -> Result<()> {
        let conn = self.conn()?;
        let prerequisite = channel::resolve(&conn, prerequisite)?;
        let content = channel::resolve(&conn, content)?;
        insert_prerequisite(&conn, self.cycle_policy(), &prerequisite, &content)
    }

    /// Record that two nodes are related, in both directions.
    pub fn set_is_related(&self, content: &ContentRef, related: &ContentRef) -> Result<EdgeChange> {
        let mut conn = self.conn()?;
        let content = channel::resolve(&conn, content)?;
        let related = channel::resolve(&conn, related)?;

        let tx = conn.transaction()?;
        let change = insert_related(&tx, &content, &related)?;
        tx.commit()?;
        Ok(change)
    }

    /// Direct prerequisites of `content`, in the order they were recorded.
    pub fn get_all_prerequisites(&self, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;
        let sql = format!(
            "{} JOIN prerequisite p ON p.prerequisite_id = c.id WHERE p.target_id = ?1 ORDER BY p.id",
            CONTENT_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params![node.id], row_to_content)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Nodes related to `content`, in the order the relations were recorded.
    pub fn get_all_related(&self, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;
        let sql = format!(
            "{} JOIN related r ON r.content_2_id = c.id WHERE r.content_1_id = ?1 ORDER BY r.id",
            CONTENT_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params![node.id], row_to_content)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }
}

pub(crate) fn insert_prerequisite(
    conn: &Connection,
    policy: CyclePolicy,
    prerequisite: &ContentMetadata,
    content: &ContentMetadata,
) -> Result<()> {
    if prerequisite.id == content.id {
        return Err(Error::constraint(format!(
            "{} cannot be its own prerequisite",
            content.title
        )));
    }
    if prerequisite_exists(conn, content.id, prerequisite.id)? {
        return Err(Error::constraint(format!(
            "{} is already a prerequisite of {}",
            prerequisite.title, content.title
        )));
    }
    if prerequisite_exists(conn, prerequisite.id, content.id)? {
        return Err(Error::constraint(format!(
            "{} is already a prerequisite of {}",
            content.title, prerequisite.title
        )));
    }
    if policy == CyclePolicy::Transitive && requires(conn, prerequisite.id, content.id)? {
        return Err(Error::constraint(format!(
            "{} already depends on {}",
            prerequisite.title, content.title
        )));
    }

    conn.execute(
        "INSERT INTO prerequisite (target_id, prerequisite_id) VALUES (?1, ?2)",
        params![content.id, prerequisite.id],
    )?;
    debug!(prerequisite = %prerequisite.content_id, content = %content.content_id, "set prerequisite");
    Ok(())
}

fn prerequisite_exists(conn: &Connection, target: i64, prerequisite: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM prerequisite WHERE target_id = ?1 AND prerequisite_id = ?2",
            params![target, prerequisite],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Whether `from` transitively requires `to`.
fn requires(conn: &Connection, from: i64, to: i64) -> Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT prerequisite_id FROM prerequisite WHERE target_id = ?1")?;
    let mut seen = HashSet::new();
    let mut stack = vec![from];

    while let Some(node) = stack.pop() {
        if node == to {
            return Ok(true);
        }
        if !seen.insert(node) {
            continue;
        }
        let next = stmt
            .query_map(params![node], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stack.extend(next);
    }
    Ok(false)
}

/// Write both directions of a related edge. Callers provide the transaction.
pub(crate) fn insert_related(
    conn: &Connection,
    content: &ContentMetadata,
    related: &ContentMetadata,
) -> Result<EdgeChange> {
    if content.id == related.id {
        return Err(Error::constraint(format!(
            "{} cannot be related to itself",
            content.title
        )));
    }

    let declared: Option<bool> = conn
        .query_row(
            "SELECT declared FROM related WHERE content_1_id = ?1 AND content_2_id = ?2",
            params![content.id, related.id],
            |row| row.get(0),
        )
        .optional()?;

    match declared {
        Some(true) => Err(Error::constraint(format!(
            "{} is already related to {}",
            content.title, related.title
        ))),
        Some(false) => {
            debug!(content = %content.content_id, related = %related.content_id, "relation already recorded in reverse");
            Ok(EdgeChange::Unchanged)
        }
        None => {
            conn.execute(
                "INSERT INTO related (content_1_id, content_2_id, declared) VALUES (?1, ?2, 1)",
                params![content.id, related.id],
            )?;
            conn.execute(
                "INSERT INTO related (content_1_id, content_2_id, declared) VALUES (?1, ?2, 0)",
                params![related.id, content.id],
            )?;
            debug!(content = %content.content_id, related = %related.content_id, "set related");
            Ok(EdgeChange::Created)
        }
    }
}
