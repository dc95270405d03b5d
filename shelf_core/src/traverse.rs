//! Read-only traversal of a channel's content tree.

use crate::channel::{
    self, CONTENT_SELECT, ChannelDb, FILE_SELECT, FORMAT_SELECT, row_to_content, row_to_file,
    row_to_format,
};
use crate::error::{Error, Result};
use crate::model::{ContentKind, ContentMetadata, File, Format};
use crate::reference::{ContentIds, ContentRef};
use rusqlite::{Connection, params};
use std::str::FromStr;
use tracing::debug;

/// Which formats of the leaf scope to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatScope {
    /// Every format.
    #[default]
    All,
    /// Formats with at least one File row.
    Possible,
    /// Formats with at least one File holding a content copy.
    Available,
}

impl FormatScope {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(FormatScope::All),
            "possible" => Ok(FormatScope::Possible),
            "available" => Ok(FormatScope::Available),
            _ => Err(Error::type_kind("all, possible or available", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatScope::All => "all",
            FormatScope::Possible => "possible",
            FormatScope::Available => "available",
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            FormatScope::All => "",
            FormatScope::Possible => " AND EXISTS (SELECT 1 FROM file fl WHERE fl.format_id = f.id)",
            FormatScope::Available => {
                " AND EXISTS (SELECT 1 FROM file fl WHERE fl.format_id = f.id \
                 AND fl.content_copy IS NOT NULL)"
            }
        }
    }
}

impl FromStr for FormatScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FormatScope::parse(s)
    }
}

impl ChannelDb {
    /// Direct children, ordered by sort order then insertion.
    pub fn immediate_children(&self, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;
        children(&conn, node.id)
    }

    /// Topic ancestors, from the root down to the parent.
    pub fn get_ancestor_topics(&self, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;

        let mut ancestors = Vec::new();
        let mut parent = node.parent;
        while let Some(id) = parent {
            let ancestor = channel::content_by_row(&conn, id)?;
            parent = ancestor.parent;
            if ancestor.kind == ContentKind::Topic {
                ancestors.push(ancestor);
            }
        }
        ancestors.reverse();
        Ok(ancestors)
    }

    /// Descendants without children, depth-first, left to right.
    pub fn leaves(&self, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;
        leaves(&conn, &node)
    }

    /// Descendants of `kind`, depth-first pre-order.
    pub fn children_of_kind(
        &self,
        content: &ContentRef,
        kind: ContentKind,
    ) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;

        let mut found = Vec::new();
        walk(&conn, &node, &mut |n, _| {
            if n.kind == kind {
                found.push(n.clone());
            }
        })?;
        Ok(found)
    }

    pub fn get_all_formats(&self, content: &ContentRef) -> Result<Vec<Format>> {
        self.formats(content, FormatScope::All)
    }

    pub fn get_possible_formats(&self, content: &ContentRef) -> Result<Vec<Format>> {
        self.formats(content, FormatScope::Possible)
    }

    pub fn get_available_formats(&self, content: &ContentRef) -> Result<Vec<Format>> {
        self.formats(content, FormatScope::Available)
    }

    /// Formats attached to the leaf scope of `content`.
    pub fn formats(&self, content: &ContentRef, scope: FormatScope) -> Result<Vec<Format>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;
        let sql = format!(
            "{} WHERE f.contentmetadata_id = ?1{} ORDER BY f.id",
            FORMAT_SELECT,
            scope.filter()
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut formats = Vec::new();
        for n in leaf_scope(&conn, node)? {
            let rows = stmt.query_map(params![n.id], row_to_format)?;
            for row in rows {
                formats.push(row?);
            }
        }
        debug!(content = %content.content_id(), ?scope, count = formats.len(), "formats");
        Ok(formats)
    }

    /// Files of the leaf scope whose format has the given quality.
    pub fn get_files_for_quality(&self, content: &ContentRef, quality: &str) -> Result<Vec<File>> {
        let sql = format!(
            "{} JOIN format f ON f.id = fl.format_id \
             WHERE f.contentmetadata_id = ?1 AND f.quality = ?2 ORDER BY f.id, fl.id",
            FILE_SELECT
        );
        self.scope_files(content, &sql, Some(quality))
    }

    /// Files of the leaf scope without a content copy.
    pub fn get_missing_files(&self, content: &ContentRef) -> Result<Vec<File>> {
        let sql = format!(
            "{} JOIN format f ON f.id = fl.format_id \
             WHERE f.contentmetadata_id = ?1 AND fl.content_copy IS NULL \
             ORDER BY f.id, fl.id",
            FILE_SELECT
        );
        self.scope_files(content, &sql, None)
    }

    fn scope_files(
        &self,
        content: &ContentRef,
        sql: &str,
        quality: Option<&str>,
    ) -> Result<Vec<File>> {
        let conn = self.conn()?;
        let node = channel::resolve(&conn, content)?;

        let mut stmt = conn.prepare(sql)?;
        let mut files = Vec::new();
        for n in leaf_scope(&conn, node)? {
            let rows = match quality {
                Some(q) => stmt.query_map(params![n.id, q], row_to_file)?,
                None => stmt.query_map(params![n.id], row_to_file)?,
            };
            for row in rows {
                files.push(row?);
            }
        }
        Ok(files)
    }

    /// Nodes with the given content ids, ordered by row id.
    ///
    /// Duplicate ids collapse. Any id missing from the channel is NotFound.
    pub fn get_content_with_id(&self, ids: &ContentIds) -> Result<Vec<ContentMetadata>> {
        let conn = self.conn()?;
        let mut nodes = ids
            .to_vec()
            .into_iter()
            .map(|id| channel::resolve(&conn, &ContentRef::Id(id)))
            .collect::<Result<Vec<_>>>()?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }
}

fn children(conn: &Connection, parent: i64) -> Result<Vec<ContentMetadata>> {
    let sql = format!(
        "{} WHERE c.parent_id = ?1 ORDER BY c.sort_order, c.id",
        CONTENT_SELECT
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let nodes = stmt
        .query_map(params![parent], row_to_content)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

/// Depth-first pre-order walk over the descendants of `node`.
///
/// The callback receives each descendant and whether it has children.
fn walk<F>(conn: &Connection, node: &ContentMetadata, visit: &mut F) -> Result<()>
where
    F: FnMut(&ContentMetadata, bool),
{
    // explicit stack; reversed so the first child is visited first
    let mut stack: Vec<ContentMetadata> = children(conn, node.id)?.into_iter().rev().collect();
    while let Some(n) = stack.pop() {
        let kids = children(conn, n.id)?;
        visit(&n, !kids.is_empty());
        stack.extend(kids.into_iter().rev());
    }
    Ok(())
}

fn leaves(conn: &Connection, node: &ContentMetadata) -> Result<Vec<ContentMetadata>> {
    let mut found = Vec::new();
    walk(conn, node, &mut |n, has_children| {
        if !has_children {
            found.push(n.clone());
        }
    })?;
    Ok(found)
}

/// The leaves of `node`, or `node` itself when it has no children.
fn leaf_scope(conn: &Connection, node: ContentMetadata) -> Result<Vec<ContentMetadata>> {
    let found = leaves(conn, &node)?;
    if found.is_empty() {
        Ok(vec![node])
    } else {
        Ok(found)
    }
}
