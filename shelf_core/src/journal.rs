//! Append-only log of content-copy store operations.
//!
//! Each line is `<unix seconds>|<operation>|<blob name>|<metadata>`. The log
//! is informational: the reference counts live in the channel databases.

use crate::error::{Error, Result};
use crate::refcount::BlobKey;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// What happened to a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Blob written, or an existing blob gained a reference.
    Attach,
    /// A reference was dropped and others remain.
    Release,
    /// The last reference was dropped and the blob removed.
    Delete,
    /// Garbage collection removed an unreferenced blob.
    Gc,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Attach => "attach",
            Operation::Release => "release",
            Operation::Delete => "delete",
            Operation::Gc => "gc",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attach" => Ok(Operation::Attach),
            "release" => Ok(Operation::Release),
            "delete" => Ok(Operation::Delete),
            "gc" => Ok(Operation::Gc),
            other => Err(Error::invalid_journal_entry(other)),
        }
    }
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub timestamp: i64,
    pub operation: Operation,
    pub key: BlobKey,
    /// Free-form `name=value` pairs, e.g. `refs=2,size=31`.
    pub metadata: String,
}

impl JournalEntry {
    pub fn now(operation: Operation, key: &BlobKey, metadata: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);
        Self {
            timestamp,
            operation,
            key: key.clone(),
            metadata: metadata.into(),
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.timestamp, self.operation, self.key, self.metadata
        )
    }
}

impl FromStr for JournalEntry {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let invalid = || Error::invalid_journal_entry(line);
        let mut fields = line.splitn(4, '|');
        let (Some(timestamp), Some(operation), Some(blob), Some(metadata)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            timestamp: timestamp.parse().map_err(|_| invalid())?,
            operation: operation.parse()?,
            key: BlobKey::from_name(blob)?,
            metadata: metadata.to_string(),
        })
    }
}

/// The journal file of a content-copy store.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Open the journal at `path`, creating an empty one if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = self.write_lock.lock()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }

    /// The last `count` entries, oldest first. Unparseable lines are skipped.
    pub fn read_recent(&self, count: usize) -> Result<Vec<JournalEntry>> {
        if count == 0 || !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut recent = VecDeque::with_capacity(count.min(1024));
        for line in BufReader::new(File::open(&self.path)?).lines() {
            let Ok(entry) = line?.trim().parse::<JournalEntry>() else {
                continue;
            };
            if recent.len() == count {
                recent.pop_front();
            }
            recent.push_back(entry);
        }
        Ok(recent.into())
    }
}
