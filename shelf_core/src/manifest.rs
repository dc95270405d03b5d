//! Channel manifests: the JSON form a channel is imported from.

use crate::channel::{self, ChannelDb};
use crate::edges::{self, EdgeChange};
use crate::error::{Error, Result};
use crate::model::{ChannelMetadata, ContentId, ContentMetadata, File, Format, License, MimeType};
use crate::reference::ContentRef;
use crate::refcount::BlobKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// `prerequisite` must be completed before `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    pub prerequisite: ContentId,
    pub content: ContentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEdge {
    pub content: ContentId,
    pub related: ContentId,
}

/// Everything stored in one channel database.
///
/// Content rows are listed parents first. Formats, files and nodes refer to
/// each other by row id; edges refer to nodes by content id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelManifest {
    pub channel: ChannelMetadata,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub mimetypes: Vec<MimeType>,
    #[serde(default)]
    pub content: Vec<ContentMetadata>,
    #[serde(default)]
    pub formats: Vec<Format>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteEdge>,
    #[serde(default)]
    pub related: Vec<RelatedEdge>,
}

/// Row counts written by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub content: usize,
    pub formats: usize,
    pub files: usize,
    pub prerequisites: usize,
    pub related: usize,
}

impl ChannelManifest {
    pub fn new(channel: ChannelMetadata) -> Self {
        Self {
            channel,
            licenses: Vec::new(),
            mimetypes: Vec::new(),
            content: Vec::new(),
            formats: Vec::new(),
            files: Vec::new(),
            prerequisites: Vec::new(),
            related: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The root node: the single row without a parent.
    pub fn root(&self) -> Result<&ContentMetadata> {
        let mut roots = self.content.iter().filter(|n| n.is_root());
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root),
            (None, _) => Err(Error::invalid_manifest("no root node")),
            (Some(_), Some(_)) => Err(Error::invalid_manifest("more than one root node")),
        }
    }

    /// Check that rows form a tree and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        self.root()?;

        let licenses: HashSet<i64> = self.licenses.iter().map(|l| l.id).collect();
        let mimetypes: HashSet<i64> = self.mimetypes.iter().map(|m| m.id).collect();

        let mut rows = HashSet::new();
        let mut content_ids = HashSet::new();
        for node in &self.content {
            if let Some(parent) = node.parent
                && !rows.contains(&parent)
            {
                return Err(Error::invalid_manifest(format!(
                    "{} is listed before its parent (row {})",
                    node.title, parent
                )));
            }
            if let Some(license) = &node.license
                && !licenses.contains(&license.id)
            {
                return Err(Error::invalid_manifest(format!(
                    "{} has unknown license {}",
                    node.title, license.id
                )));
            }
            if !rows.insert(node.id) {
                return Err(Error::invalid_manifest(format!("duplicate row id {}", node.id)));
            }
            if !content_ids.insert(node.content_id) {
                return Err(Error::invalid_manifest(format!(
                    "duplicate content id {}",
                    node.content_id
                )));
            }
        }

        let mut formats = HashSet::new();
        for format in &self.formats {
            if !rows.contains(&format.content) {
                return Err(Error::invalid_manifest(format!(
                    "format {} belongs to unknown row {}",
                    format.id, format.content
                )));
            }
            if let Some(mimetype) = &format.mimetype
                && !mimetypes.contains(&mimetype.id)
            {
                return Err(Error::invalid_manifest(format!(
                    "format {} has unknown mimetype {}",
                    format.id, mimetype.id
                )));
            }
            formats.insert(format.id);
        }

        for file in &self.files {
            if !formats.contains(&file.format) {
                return Err(Error::invalid_manifest(format!(
                    "file {} belongs to unknown format {}",
                    file.id, file.format
                )));
            }
            BlobKey::from_file(file).map_err(|e| {
                Error::invalid_manifest(format!("file {} content copy: {}", file.id, e))
            })?;
        }

        let edge_ids = self
            .prerequisites
            .iter()
            .flat_map(|e| [e.prerequisite, e.content])
            .chain(self.related.iter().flat_map(|e| [e.content, e.related]));
        for id in edge_ids {
            if !content_ids.contains(&id) {
                return Err(Error::invalid_manifest(format!(
                    "edge refers to unknown content {}",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Validate and write the manifest into an empty channel database.
    ///
    /// Everything is written in one transaction; edges go through the same
    /// checks as `set_prerequisite` and `set_is_related`.
    pub fn import_into(&self, db: &ChannelDb) -> Result<ImportSummary> {
        if self.channel.channel_id != *db.channel_id() {
            return Err(Error::invalid_manifest(format!(
                "manifest is for channel {}, database is {}",
                self.channel.channel_id,
                db.channel_id()
            )));
        }
        self.validate()?;

        let mut conn = db.conn()?;
        let existing: i64 =
            conn.query_row("SELECT COUNT(*) FROM content_metadata", [], |row| row.get(0))?;
        if existing > 0 {
            return Err(Error::invalid_manifest(format!(
                "channel {} already has content",
                db.channel_id()
            )));
        }

        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();

        let mut metadata = self.channel.clone();
        metadata.root = Some(self.root()?.content_id);
        channel::save_metadata_row(&tx, &metadata)?;

        for license in &self.licenses {
            channel::insert_license_row(&tx, license)?;
        }
        for mimetype in &self.mimetypes {
            channel::insert_mimetype_row(&tx, mimetype)?;
        }
        for node in &self.content {
            channel::insert_content_row(&tx, node)?;
            summary.content += 1;
        }
        for format in &self.formats {
            channel::insert_format_row(&tx, format)?;
            summary.formats += 1;
        }
        for file in &self.files {
            channel::insert_file_row(&tx, file)?;
            summary.files += 1;
        }

        for edge in &self.prerequisites {
            let prerequisite = channel::resolve(&tx, &ContentRef::Id(edge.prerequisite))?;
            let content = channel::resolve(&tx, &ContentRef::Id(edge.content))?;
            edges::insert_prerequisite(&tx, db.cycle_policy(), &prerequisite, &content)?;
            summary.prerequisites += 1;
        }
        for edge in &self.related {
            let content = channel::resolve(&tx, &ContentRef::Id(edge.content))?;
            let related = channel::resolve(&tx, &ContentRef::Id(edge.related))?;
            if edges::insert_related(&tx, &content, &related)? == EdgeChange::Created {
                summary.related += 1;
            }
        }

        tx.commit()?;
        info!(channel = %db.channel_id(), ?summary, "imported channel");
        Ok(summary)
    }
}
