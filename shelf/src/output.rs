//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use serde::Serialize;
use shelf_core::{
    ChannelId, ContentId, ContentMetadata, ErrorKind, File, Format, GcStats, ImportSummary,
    JournalEntry, Orphan,
};
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message with its context chain.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    kind: error_kind(error).map(|k| k.to_string()),
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

/// Classification of the library error at the root of `error`, if any.
pub fn error_kind(error: &anyhow::Error) -> Option<ErrorKind> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<shelf_core::Error>())
        .map(shelf_core::Error::kind)
}

/// Process exit code for a failed command.
pub fn result_code(error: &anyhow::Error) -> u8 {
    match error_kind(error) {
        Some(ErrorKind::NotFound) => 2,
        Some(ErrorKind::ConstraintViolation) => 3,
        Some(ErrorKind::TypeKind) | Some(ErrorKind::Invalid) => 4,
        Some(ErrorKind::StoreIo) | Some(ErrorKind::Database) | None => 1,
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub home: String,
    pub content_copy_dir: String,
    pub channel_dir: String,
    pub algorithm: String,
}

/// Output for `import` command.
#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub success: bool,
    pub result_code: u8,
    pub channel: ChannelId,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

/// Channel information for `channels` command.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub channel_id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content_count: usize,
}

/// Output for `channels` command.
#[derive(Debug, Serialize)]
pub struct ChannelsOutput {
    pub success: bool,
    pub result_code: u8,
    pub channels: Vec<ChannelInfo>,
}

/// Content node information for node listings.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub content_id: ContentId,
    pub title: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<i64>,
}

impl From<ContentMetadata> for NodeInfo {
    fn from(node: ContentMetadata) -> Self {
        Self {
            content_id: node.content_id,
            title: node.title,
            kind: node.kind.to_string(),
            parent: node.parent,
        }
    }
}

/// Output for `children`, `ancestors`, `leaves`, `kind`, `prerequisites`
/// and `related` commands.
#[derive(Debug, Serialize)]
pub struct NodesOutput {
    pub success: bool,
    pub result_code: u8,
    pub channel: ChannelId,
    pub content: ContentId,
    pub nodes: Vec<NodeInfo>,
}

/// Format information for `formats` command.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub id: i64,
    pub quality: String,
    pub format_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

impl From<Format> for FormatInfo {
    fn from(format: Format) -> Self {
        Self {
            id: format.id,
            quality: format.quality,
            format_size: format.format_size,
            mimetype: format.mimetype.map(|m| m.readable_name),
        }
    }
}

/// Output for `formats` command.
#[derive(Debug, Serialize)]
pub struct FormatsOutput {
    pub success: bool,
    pub result_code: u8,
    pub scope: String,
    pub formats: Vec<FormatInfo>,
}

/// Output for `missing` and `quality` commands.
#[derive(Debug, Serialize)]
pub struct FilesOutput {
    pub success: bool,
    pub result_code: u8,
    pub files: Vec<File>,
}

/// Output for `set-prerequisite` and `set-related` commands.
#[derive(Debug, Serialize)]
pub struct EdgeOutput {
    pub success: bool,
    pub result_code: u8,
    pub edge: String,
    pub from: ContentId,
    pub to: ContentId,
    pub created: bool,
}

/// Output for `copy` command.
#[derive(Debug, Serialize)]
pub struct CopyOutput {
    pub success: bool,
    pub result_code: u8,
    pub file: File,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Output for `gc` command.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub dry_run: bool,
    #[serde(flatten)]
    pub stats: GcStats,
}

/// Output for `orphans` command.
#[derive(Debug, Serialize)]
pub struct OrphansOutput {
    pub success: bool,
    pub result_code: u8,
    pub orphans: Vec<Orphan>,
}

/// Journal entry information.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntryInfo {
    pub timestamp: i64,
    pub timestamp_human: String,
    pub operation: String,
    pub blob: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl From<JournalEntry> for JournalEntryInfo {
    fn from(entry: JournalEntry) -> Self {
        let timestamp_human = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());
        Self {
            timestamp: entry.timestamp,
            timestamp_human,
            operation: entry.operation.to_string(),
            blob: entry.key.name(),
            metadata: (!entry.metadata.is_empty()).then_some(entry.metadata),
        }
    }
}

/// Output for `journal` command.
#[derive(Debug, Serialize)]
pub struct JournalOutput {
    pub success: bool,
    pub result_code: u8,
    pub entries: Vec<JournalEntryInfo>,
}
