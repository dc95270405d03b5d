//! Channel entities: content nodes, formats, files and their lookups.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key of an isolated channel dataset.
///
/// Also the stem of the channel's database file, so it is restricted to
/// ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_channel_id("Channel id cannot be empty"));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::invalid_channel_id(format!(
                "Channel id {:?} contains {:?}",
                id, c
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ChannelId::new(value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChannelId::new(s)
    }
}

/// Globally stable content identifier, preserved across re-imports.
///
/// Rendered as 32 lowercase hex digits without dashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Uuid);

impl ContentId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic id for `name` within `namespace` (UUID v5).
    pub fn derive(namespace: &str, name: &str) -> Self {
        let ns = Uuid::new_v5(&Uuid::NAMESPACE_URL, namespace.as_bytes());
        Self(Uuid::new_v5(&ns, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0.simple())
    }
}

impl FromStr for ContentId {
    type Err = Error;

    /// Accepts both the simple and the hyphenated UUID forms.
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(ContentId)
            .map_err(|_| Error::content_not_found(s))
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uuid::parse_str(&s)
            .map(ContentId)
            .map_err(serde::de::Error::custom)
    }
}

/// Type tag of a content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Topic,
    Video,
    Audio,
    Exercise,
    Document,
    Html5,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Topic => "topic",
            ContentKind::Video => "video",
            ContentKind::Audio => "audio",
            ContentKind::Exercise => "exercise",
            ContentKind::Document => "document",
            ContentKind::Html5 => "html5",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "topic" => Ok(ContentKind::Topic),
            "video" => Ok(ContentKind::Video),
            "audio" => Ok(ContentKind::Audio),
            "exercise" => Ok(ContentKind::Exercise),
            "document" => Ok(ContentKind::Document),
            "html5" => Ok(ContentKind::Html5),
            _ => Err(Error::invalid_kind(s)),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ContentKind::parse(s)
    }
}

/// License attached to a content node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct License {
    pub id: i64,
    pub license_name: String,
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.license_name)
    }
}

/// Encoding of a format (e.g. `video_high`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MimeType {
    pub id: i64,
    pub readable_name: String,
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.readable_name)
    }
}

/// A node of a channel's content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Row key within the channel database.
    pub id: i64,
    pub content_id: ContentId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub slug: String,
    /// Row key of the parent; `None` only for the channel root.
    pub parent: Option<i64>,
    #[serde(default)]
    pub sort_order: f64,
    #[serde(default)]
    pub license: Option<License>,
}

impl ContentMetadata {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl fmt::Display for ContentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// One quality/encoding tier of a content node's playable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub id: i64,
    /// Row key of the owning content node.
    pub content: i64,
    pub quality: String,
    pub format_size: i64,
    #[serde(default)]
    pub mimetype: Option<MimeType>,
}

/// A downloadable unit bound to one format.
///
/// Several File rows may carry the same checksum; they then share one blob in
/// the content-copy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    /// Row key of the format.
    pub format: i64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub file_size: i64,
    /// Blob path relative to the store root; `None` when not materialized.
    #[serde(default)]
    pub content_copy: Option<String>,
}

impl File {
    pub fn has_content_copy(&self) -> bool {
        self.content_copy.is_some()
    }

    pub(crate) fn clear_content_copy(&mut self) {
        self.checksum = None;
        self.extension = None;
        self.content_copy = None;
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.checksum.as_deref().unwrap_or(""),
            self.extension.as_deref().unwrap_or("")
        )
    }
}

/// Descriptive record of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channel_id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: i64,
    /// Content id of the root node, filled in by import.
    #[serde(default)]
    pub root: Option<ContentId>,
}

impl fmt::Display for ChannelMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
