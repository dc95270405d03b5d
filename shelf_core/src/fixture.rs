//! The `content_test` channel shared by the unit tests.
//!
//! ```text
//! root (topic)
//! ├── c1 (video)       formats: high/102 (video_high), low/51 (video_low)
//! └── c2 (topic)
//!     ├── c2c1 (exercise)  format: medium/46 with two files
//!     ├── c2c2 (topic)
//!     └── c2c3 (topic)
//! ```
//!
//! c1 requires root; c1 and c2 are related. No file has a content copy.

use crate::channel::ChannelDb;
use crate::config::LibraryConfig;
use crate::library::Library;
use crate::manifest::{ChannelManifest, PrerequisiteEdge, RelatedEdge};
use crate::model::{
    ChannelId, ChannelMetadata, ContentId, ContentKind, ContentMetadata, File, Format, License,
    MimeType,
};
use std::path::Path;

pub const CHANNEL: &str = "content_test";

pub const FORMAT_HIGH: i64 = 1;
pub const FORMAT_LOW: i64 = 2;
pub const FORMAT_EXERCISE: i64 = 3;

pub fn id(title: &str) -> ContentId {
    ContentId::derive(CHANNEL, title)
}

pub fn channel_id() -> ChannelId {
    ChannelId::new(CHANNEL).unwrap()
}

fn node(row: i64, title: &str, kind: ContentKind, parent: Option<i64>, sort_order: f64) -> ContentMetadata {
    ContentMetadata {
        id: row,
        content_id: id(title),
        title: title.to_string(),
        description: String::new(),
        kind,
        slug: title.to_string(),
        parent,
        sort_order,
        license: Some(License {
            id: 1,
            license_name: "WTFPL".to_string(),
        }),
    }
}

fn file(row: i64, format: i64, checksum: Option<&str>, extension: &str) -> File {
    File {
        id: row,
        format,
        checksum: checksum.map(str::to_string),
        extension: Some(extension.to_string()),
        file_size: 31,
        content_copy: None,
    }
}

pub fn content_test_manifest() -> ChannelManifest {
    let video_high = MimeType {
        id: 1,
        readable_name: "video_high".to_string(),
    };
    let video_low = MimeType {
        id: 2,
        readable_name: "video_low".to_string(),
    };

    let mut manifest = ChannelManifest::new(ChannelMetadata {
        channel_id: channel_id(),
        name: "Content Test".to_string(),
        description: "Channel used by the unit tests".to_string(),
        author: "shelf".to_string(),
        version: 1,
        root: None,
    });

    manifest.licenses.push(License {
        id: 1,
        license_name: "WTFPL".to_string(),
    });
    manifest.mimetypes.push(video_high.clone());
    manifest.mimetypes.push(video_low.clone());

    manifest.content = vec![
        node(1, "root", ContentKind::Topic, None, 0.0),
        node(2, "c1", ContentKind::Video, Some(1), 1.0),
        node(3, "c2", ContentKind::Topic, Some(1), 2.0),
        node(4, "c2c1", ContentKind::Exercise, Some(3), 1.0),
        node(5, "c2c2", ContentKind::Topic, Some(3), 2.0),
        node(6, "c2c3", ContentKind::Topic, Some(3), 3.0),
    ];

    manifest.formats = vec![
        Format {
            id: FORMAT_HIGH,
            content: 2,
            quality: "high".to_string(),
            format_size: 102,
            mimetype: Some(video_high),
        },
        Format {
            id: FORMAT_LOW,
            content: 2,
            quality: "low".to_string(),
            format_size: 51,
            mimetype: Some(video_low),
        },
        Format {
            id: FORMAT_EXERCISE,
            content: 4,
            quality: "medium".to_string(),
            format_size: 46,
            mimetype: None,
        },
    ];

    manifest.files = vec![
        file(1, FORMAT_HIGH, Some("09293abba61d4fcfa4e3bd804bcaba43"), ".pdf"),
        file(2, FORMAT_LOW, None, ".mp4"),
        file(3, FORMAT_EXERCISE, None, ".pdf"),
        file(4, FORMAT_EXERCISE, None, ".pdf"),
    ];

    manifest.prerequisites.push(PrerequisiteEdge {
        prerequisite: id("root"),
        content: id("c1"),
    });
    manifest.related.push(RelatedEdge {
        content: id("c1"),
        related: id("c2"),
    });

    manifest
}

/// In-memory database holding the imported channel.
pub fn content_test_db() -> ChannelDb {
    let db = ChannelDb::open_in_memory(channel_id()).unwrap();
    content_test_manifest().import_into(&db).unwrap();
    db
}

/// A library under `home` with the channel imported.
pub fn content_test_library(home: &Path) -> Library {
    let library = Library::open(LibraryConfig::for_home(home)).unwrap();
    library.import_manifest(&content_test_manifest()).unwrap();
    library
}
