//! Reference counting for content copies.

use crate::error::{Error, Result};
use crate::hash::{DIGEST_SIZE, Digest};
use crate::model::File;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;

/// Identity of a blob in the content-copy store.
///
/// The file name of a blob is the hex digest followed by the extension of the
/// file it was copied from, so identical bytes under two extensions are two
/// blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub digest: Digest,
    /// Extension including the leading dot, or empty.
    pub extension: String,
}

impl BlobKey {
    pub fn new(digest: Digest, extension: impl Into<String>) -> Self {
        Self {
            digest,
            extension: extension.into(),
        }
    }

    /// File name of the blob: `<hex digest><extension>`.
    pub fn name(&self) -> String {
        format!("{}{}", self.digest.to_hex(), self.extension)
    }

    /// Parse a blob file name back into a key.
    pub fn from_name(name: &str) -> Result<Self> {
        let hex_len = DIGEST_SIZE * 2;
        if name.len() < hex_len || !name.is_char_boundary(hex_len) {
            return Err(Error::invalid_hash(format!("Not a blob name: {}", name)));
        }
        let (hex, extension) = name.split_at(hex_len);
        if !extension.is_empty() && !extension.starts_with('.') {
            return Err(Error::invalid_hash(format!("Not a blob name: {}", name)));
        }
        Ok(Self::new(Digest::from_hex(hex)?, extension))
    }

    /// Key of the content copy held by a File row, if any.
    pub fn from_file(file: &File) -> Result<Option<Self>> {
        if !file.has_content_copy() {
            return Ok(None);
        }
        let checksum = file
            .checksum
            .as_deref()
            .ok_or_else(|| Error::invalid_hash(format!("File {} has no checksum", file.id)))?;
        let extension = file.extension.clone().unwrap_or_default();
        Ok(Some(Self::new(Digest::from_hex(checksum)?, extension)))
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.digest, self.extension)
    }
}

/// Outcome of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other references remain.
    Retained(u64),
    /// That was the last reference.
    Last,
    /// The key had no references to begin with.
    Untracked,
}

/// Reference counts for every blob referenced by an attached channel.
///
/// A key is present only while its count is positive. The map entry guard is
/// held across the callback of [`RefCounter::acquire`] and
/// [`RefCounter::release`], so blob I/O for one key is serialized.
#[derive(Debug, Default)]
pub struct RefCounter {
    counts: DashMap<BlobKey, u64>,
}

impl RefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, key: &BlobKey) -> u64 {
        self.counts.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn is_referenced(&self, key: &BlobKey) -> bool {
        self.count(key) > 0
    }

    /// Add a reference, running `materialize` first under the key's lock.
    ///
    /// The count is only incremented if `materialize` succeeds.
    pub fn acquire<F>(&self, key: &BlobKey, materialize: F) -> Result<u64>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut entry = self.counts.entry(key.clone()).or_insert(0);
        if let Err(e) = materialize() {
            if *entry == 0 {
                drop(entry);
                self.counts.remove_if(key, |_, c| *c == 0);
            }
            return Err(e);
        }
        *entry += 1;
        Ok(*entry)
    }

    /// Add a reference without touching the blob.
    pub fn retain(&self, key: &BlobKey) -> u64 {
        let mut entry = self.counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Drop a reference. When it was the last one, `on_last` runs under the
    /// key's lock before the key is forgotten.
    pub fn release<F>(&self, key: &BlobKey, on_last: F) -> Result<Release>
    where
        F: FnOnce() -> Result<()>,
    {
        match self.counts.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > 1 {
                    *entry.get_mut() -= 1;
                    return Ok(Release::Retained(*entry.get()));
                }
                on_last()?;
                entry.remove();
                Ok(Release::Last)
            }
            Entry::Vacant(_) => {
                on_last()?;
                Ok(Release::Untracked)
            }
        }
    }

    /// Drop a reference without touching the blob.
    pub fn forget(&self, key: &BlobKey) {
        if let Entry::Occupied(mut entry) = self.counts.entry(key.clone()) {
            if *entry.get() > 1 {
                *entry.get_mut() -= 1;
            } else {
                entry.remove();
            }
        }
    }

    /// Run `f` under the key's lock if the key is unreferenced.
    ///
    /// Returns `None` when the key is referenced.
    pub fn with_unreferenced<F, T>(&self, key: &BlobKey, f: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        match self.counts.entry(key.clone()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(_guard) => f().map(Some),
        }
    }
}
