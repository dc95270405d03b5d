//! References to content nodes and files as accepted by the public API.
//!
//! Typed callers build a [`ContentRef`] from a node or a [`ContentId`]. Outer
//! layers that receive loosely-typed input (JSON bodies, CLI arguments) go
//! through the `from_value` constructors, which reject values of the wrong
//! kind with [`Error::TypeKind`].

use crate::error::{Error, Result};
use crate::model::{ContentId, ContentMetadata, File};
use serde_json::Value;

const CONTENT_REF_EXPECTED: &str = "content node or content_id string";

/// A content node, given either resolved or by its content id.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentRef {
    Node(ContentMetadata),
    Id(ContentId),
}

impl ContentRef {
    /// The content id this reference resolves through.
    pub fn content_id(&self) -> ContentId {
        match self {
            ContentRef::Node(node) => node.content_id,
            ContentRef::Id(id) => *id,
        }
    }

    /// Convert a loosely-typed value.
    ///
    /// Strings are content ids, objects are serialized nodes. Anything else
    /// is a TypeKind error.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(ContentRef::Id(s.parse()?)),
            Value::Object(_) => serde_json::from_value::<ContentMetadata>(value.clone())
                .map(ContentRef::Node)
                .map_err(|_| Error::type_kind(CONTENT_REF_EXPECTED, "object")),
            other => Err(Error::type_kind(CONTENT_REF_EXPECTED, value_kind(other))),
        }
    }
}

impl From<ContentMetadata> for ContentRef {
    fn from(node: ContentMetadata) -> Self {
        ContentRef::Node(node)
    }
}

impl From<&ContentMetadata> for ContentRef {
    fn from(node: &ContentMetadata) -> Self {
        ContentRef::Node(node.clone())
    }
}

impl From<ContentId> for ContentRef {
    fn from(id: ContentId) -> Self {
        ContentRef::Id(id)
    }
}

/// One content id or a set of them, for `get_content_with_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentIds {
    One(ContentId),
    Many(Vec<ContentId>),
}

impl ContentIds {
    /// The requested ids with duplicates removed, first occurrence kept.
    pub fn to_vec(&self) -> Vec<ContentId> {
        match self {
            ContentIds::One(id) => vec![*id],
            ContentIds::Many(ids) => {
                let mut seen = std::collections::HashSet::new();
                ids.iter().copied().filter(|id| seen.insert(*id)).collect()
            }
        }
    }

    /// Convert a loosely-typed value: a string or an array of strings.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(ContentIds::One(s.parse()?)),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.parse(),
                    other => Err(Error::type_kind("content_id string", value_kind(other))),
                })
                .collect::<Result<Vec<_>>>()
                .map(ContentIds::Many),
            other => Err(Error::type_kind(
                "content_id string or array of content_id strings",
                value_kind(other),
            )),
        }
    }
}

impl From<ContentId> for ContentIds {
    fn from(id: ContentId) -> Self {
        ContentIds::One(id)
    }
}

impl From<Vec<ContentId>> for ContentIds {
    fn from(ids: Vec<ContentId>) -> Self {
        ContentIds::Many(ids)
    }
}

impl From<&[ContentId]> for ContentIds {
    fn from(ids: &[ContentId]) -> Self {
        ContentIds::Many(ids.to_vec())
    }
}

impl File {
    /// Convert a loosely-typed value into a File entity.
    ///
    /// Only a serialized File object is accepted.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| Error::type_kind("File", format!("object ({})", e))),
            other => Err(Error::type_kind("File", value_kind(other))),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
