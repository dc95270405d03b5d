//! # Shelf Core
//!
//! Content graph engine and content-addressed copy store for offline
//! educational channels.
//!
//! A channel is a tree of content nodes (topics and leaf items) with
//! prerequisite and related edges, stored in its own SQLite database. The
//! media behind a node's formats are File rows; a File row can point at a
//! *content copy*, a blob in a store shared by every channel. Blobs are named
//! by their BLAKE3 digest, deduplicated, and deleted once no File row
//! references them.
//!
//! ## Features
//!
//! - Tree traversal: children, ancestors, leaves, descendants of a kind
//! - Format and file queries over the leaves of a node
//! - Prerequisite (directed) and related (symmetric) edges
//! - Reference-counted, sharded content-copy store with journal and GC
//! - Channel import from JSON manifests
//!
//! ## Example
//!
//! ```no_run
//! use shelf_core::{ChannelId, ChannelManifest, ContentKind, Library};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open the library under a home directory
//! let library = Library::open_home("./shelf-home")?;
//!
//! // Import a channel
//! let manifest = ChannelManifest::load("./channel.json")?;
//! library.import_manifest(&manifest)?;
//!
//! // Walk the tree
//! let channel: ChannelId = "khan".parse()?;
//! let root = library.channel(&channel)?.root()?.ok_or("empty channel")?;
//! for topic in library.children_of_kind(&channel, &root.clone().into(), ContentKind::Topic)? {
//!     println!("{}", topic);
//! }
//!
//! // Materialize the missing files
//! for mut file in library.get_missing_files(&channel, &root.into())? {
//!     library.update_content_copy(&channel, &mut file, Some(Path::new("./video.mp4")))?;
//! }
//!
//! // Collect blobs no channel references
//! let stats = library.gc(false)?;
//! println!("Deleted {} blobs", stats.blobs_deleted);
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod edges;
mod error;
mod gc;
mod hash;
mod journal;
mod library;
mod manifest;
mod model;
mod refcount;
mod reference;
mod store;
mod traverse;

#[cfg(test)]
mod fixture;

pub use channel::ChannelDb;
pub use config::{CONFIG_FILE, CyclePolicy, LibraryConfig};
pub use edges::EdgeChange;
pub use error::{Error, ErrorKind, Result};
pub use gc::{GcStats, Orphan};
pub use hash::{Algorithm, Digest};
pub use journal::{Journal, JournalEntry, Operation};
pub use library::Library;
pub use manifest::{ChannelManifest, ImportSummary, PrerequisiteEdge, RelatedEdge};
pub use model::{
    ChannelId, ChannelMetadata, ContentId, ContentKind, ContentMetadata, File, Format, License,
    MimeType,
};
pub use refcount::BlobKey;
pub use reference::{ContentIds, ContentRef};
pub use store::ContentCopyStore;
pub use traverse::FormatScope;
