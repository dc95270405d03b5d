//! The content-copy store.
//!
//! Blobs live at `<root>/<hex[0]>/<hex[1]>/<hex digest><extension>`. Identical
//! bytes copied from files with the same extension share one blob, and a blob
//! is deleted as soon as no File row of an attached channel references it.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Digest, HashingWriter};
use crate::journal::{Journal, JournalEntry, Operation};
use crate::refcount::{BlobKey, RefCounter, Release};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// A content-addressed store of content copies.
#[derive(Debug)]
pub struct ContentCopyStore {
    root: PathBuf,
    algorithm: Algorithm,
    journal: Journal,
    refs: RefCounter,
}

impl ContentCopyStore {
    /// Initialize a new store at the given path.
    ///
    /// Creates the root directory, a `config` file with version and
    /// algorithm, and an empty `journal`. Shard directories are created on
    /// demand.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let algorithm = Algorithm::Blake3;

        fs::create_dir_all(&root)?;

        let config_content = format!("version=1\nalgo={}\n", algorithm.as_str());
        fs::write(root.join("config"), config_content)?;

        let journal = Journal::open(root.join("journal"))?;
        info!(root = %root.display(), "initialized content-copy store");

        Ok(Self {
            root,
            algorithm,
            journal,
            refs: RefCounter::new(),
        })
    }

    /// Open an existing store at the given path.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config_content = fs::read_to_string(&config_path)?;
        let algorithm = Self::parse_config(&config_content)
            .map_err(|e| Error::invalid_store(&root, e.to_string()))?;

        let journal = Journal::open(root.join("journal"))?;

        Ok(Self {
            root,
            algorithm,
            journal,
            refs: RefCounter::new(),
        })
    }

    /// Open the store, initializing it if the directory has no config yet.
    pub fn open_or_init<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if root.join("config").exists() {
            Self::open(root)
        } else {
            Self::init(root)
        }
    }

    /// Parse the config file to extract the algorithm.
    fn parse_config(content: &str) -> Result<Algorithm> {
        let mut version = None;
        let mut algo = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::invalid_config(format!(
                "Unsupported store version: {:?}",
                version
            )));
        }

        let algo_str = algo.ok_or_else(|| Error::invalid_config("Missing algo in store config"))?;
        Algorithm::parse(algo_str)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn refs(&self) -> &RefCounter {
        &self.refs
    }

    /// Number of live references to a blob.
    pub fn ref_count(&self, key: &BlobKey) -> u64 {
        self.refs.count(key)
    }

    /// Path of the blob relative to the store root, `/`-separated.
    ///
    /// This is the value File rows carry in `content_copy`.
    pub fn relative_path(&self, key: &BlobKey) -> String {
        let [first, second] = key.digest.shard();
        format!("{}/{}/{}", first, second, key.name())
    }

    /// Absolute path of a blob.
    pub fn blob_path(&self, key: &BlobKey) -> PathBuf {
        let [first, second] = key.digest.shard();
        self.root.join(first).join(second).join(key.name())
    }

    /// Whether the blob exists on disk.
    pub fn contains(&self, key: &BlobKey) -> bool {
        self.blob_path(key).is_file()
    }

    /// Copy `source` into the store and take a reference to the resulting blob.
    ///
    /// The source is streamed into a temporary file inside the store while it
    /// is hashed. If the blob already exists the temporary file is discarded.
    pub fn attach(&self, source: &Path) -> Result<BlobKey> {
        let extension = source_extension(source);

        let mut reader = fs::File::open(source)?;
        let temp = NamedTempFile::new_in(&self.root)?;
        let mut writer = HashingWriter::new(temp);
        io::copy(&mut reader, &mut writer)?;
        let (mut temp, digest, size) = writer.finalize();
        temp.flush()?;

        let key = BlobKey::new(digest, extension);
        let blob_path = self.blob_path(&key);

        let refs = self.refs.acquire(&key, || {
            if blob_path.is_file() {
                debug!(blob = %key, "blob already present");
                return Ok(());
            }
            persist_blob(temp, &blob_path)?;
            info!(blob = %key, size, "wrote content copy");
            Ok(())
        })?;

        self.record(&JournalEntry::now(
            Operation::Attach,
            &key,
            format!("refs={},size={}", refs, size),
        ));

        Ok(key)
    }

    /// Take a reference to a blob without copying anything.
    ///
    /// Used when rebuilding counts from the File rows of a channel.
    pub fn retain(&self, key: &BlobKey) -> u64 {
        self.refs.retain(key)
    }

    /// Drop a reference without deleting anything.
    pub fn forget(&self, key: &BlobKey) {
        self.refs.forget(key)
    }

    /// Drop a reference; delete the blob when it was the last one.
    ///
    /// Returns `true` when the blob was deleted.
    pub fn release(&self, key: &BlobKey) -> Result<bool> {
        let released = self.refs.release(key, || self.delete_blob(key))?;

        let (operation, metadata, deleted) = match released {
            Release::Retained(n) => (Operation::Release, format!("refs={}", n), false),
            Release::Last => (Operation::Delete, "refs=0".to_string(), true),
            Release::Untracked => {
                warn!(blob = %key, "released a blob with no tracked references");
                (Operation::Delete, "refs=untracked".to_string(), true)
            }
        };
        self.record(&JournalEntry::now(operation, key, metadata));

        Ok(deleted)
    }

    /// Append to the journal after the change it describes has happened.
    ///
    /// The reference count and the blob are already updated, so a failed
    /// append is logged and not returned.
    pub(crate) fn record(&self, entry: &JournalEntry) {
        if let Err(e) = self.journal.append(entry) {
            warn!(operation = %entry.operation, blob = %entry.key, error = %e, "failed to append to journal");
        }
    }

    /// Remove a blob file and its shard directories if they became empty.
    ///
    /// Callers hold the key's lock.
    pub(crate) fn delete_blob(&self, key: &BlobKey) -> Result<()> {
        let path = self.blob_path(key);
        match fs::remove_file(&path) {
            Ok(()) => info!(blob = %key, "deleted content copy"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(blob = %key, "blob already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.prune_shards(&path);
        Ok(())
    }

    /// Remove the two shard directories above `blob_path` if empty.
    ///
    /// Failures are ignored; a concurrent writer may have repopulated them.
    pub(crate) fn prune_shards(&self, blob_path: &Path) {
        let mut dir = blob_path.parent();
        for _ in 0..2 {
            let Some(d) = dir else { break };
            if d == self.root || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    /// Re-hash a blob and compare against its name.
    pub fn verify(&self, key: &BlobKey) -> Result<bool> {
        let path = self.blob_path(key);
        if !path.is_file() {
            return Err(Error::blob_not_found(key.name()));
        }
        let actual = Digest::hash_file(&path)?;
        if actual != key.digest {
            warn!(blob = %key, actual = %actual, "content copy does not match its name");
        }
        Ok(actual == key.digest)
    }
}

/// Extension of the source file including the dot, or empty.
fn source_extension(source: &Path) -> String {
    source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Move a finished temporary file into place, creating shard directories.
///
/// A concurrent release may prune an empty shard directory between creation
/// and rename, so the rename is retried once.
fn persist_blob(temp: NamedTempFile, blob_path: &Path) -> Result<()> {
    let parent = blob_path
        .parent()
        .ok_or_else(|| Error::blob_not_found(blob_path.display().to_string()))?;

    let mut temp = temp;
    for attempt in 0..2 {
        fs::create_dir_all(parent)?;
        match temp.persist(blob_path) {
            Ok(_) => return Ok(()),
            Err(e) if attempt == 0 && e.error.kind() == io::ErrorKind::NotFound => {
                temp = e.file;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    const OWLS: &[u8] = b"The owls are not what they seem";
    const OWL: &[u8] = b"The owl are not what they seem";

    fn source(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_store_init() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join("config").exists());
        assert!(temp_dir.path().join("journal").exists());
        assert_eq!(store.algorithm(), Algorithm::Blake3);

        let config = fs::read_to_string(temp_dir.path().join("config")).unwrap();
        assert!(config.contains("version=1"));
        assert!(config.contains("algo=blake3-256"));
    }

    #[test]
    fn test_store_open() {
        let temp_dir = TempDir::new().unwrap();
        ContentCopyStore::init(temp_dir.path()).unwrap();
        let store = ContentCopyStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.root(), temp_dir.path());
    }

    #[test]
    fn test_store_open_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let err = ContentCopyStore::open(temp_dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_store_open_invalid_no_config() {
        let temp_dir = TempDir::new().unwrap();
        assert!(ContentCopyStore::open(temp_dir.path()).is_err());
    }

    #[test]
    fn test_open_or_init() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("content").join("storage");
        ContentCopyStore::open_or_init(&root).unwrap();
        assert!(root.join("config").exists());
        ContentCopyStore::open_or_init(&root).unwrap();
    }

    #[test]
    fn test_parse_config() {
        let algo = ContentCopyStore::parse_config("version=1\nalgo=blake3-256\n").unwrap();
        assert_eq!(algo, Algorithm::Blake3);

        let algo =
            ContentCopyStore::parse_config("# store\nversion = 1\n\nalgo = blake3-256\n").unwrap();
        assert_eq!(algo, Algorithm::Blake3);

        assert!(ContentCopyStore::parse_config("version=2\nalgo=blake3-256\n").is_err());
        assert!(ContentCopyStore::parse_config("version=1\n").is_err());
        assert!(ContentCopyStore::parse_config("version=1\nalgo=md5\n").is_err());
    }

    #[test]
    fn test_blob_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let key = BlobKey::new(Digest::hash_bytes(b"hello world"), ".pdf");
        let hex = key.digest.to_hex();
        assert_eq!(
            store.relative_path(&key),
            format!("d/7/{}.pdf", hex)
        );
        assert_eq!(
            store.blob_path(&key),
            temp_dir.path().join("d").join("7").join(format!("{}.pdf", hex))
        );
    }

    #[test]
    fn test_attach_writes_blob() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let key = store.attach(&source(&src_dir, "test_1.pdf", OWLS)).unwrap();

        assert_eq!(key.digest, Digest::hash_bytes(OWLS));
        assert_eq!(key.extension, ".pdf");
        assert_eq!(fs::read(store.blob_path(&key)).unwrap(), OWLS);
        assert_eq!(store.ref_count(&key), 1);
        assert!(store.verify(&key).unwrap());
    }

    #[test]
    fn test_attach_deduplicates() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();
        let src = source(&src_dir, "test_1.pdf", OWLS);

        let a = store.attach(&src).unwrap();
        let b = store.attach(&src).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.ref_count(&a), 2);

        let [first, second] = a.digest.shard();
        let shard = temp_dir.path().join(first).join(second);
        assert_eq!(fs::read_dir(shard).unwrap().count(), 1);

        // no temporary files left behind in the root
        let stray: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .filter(|p| p.file_name().unwrap() != "config" && p.file_name().unwrap() != "journal")
            .collect();
        assert!(stray.is_empty(), "{:?}", stray);
    }

    #[test]
    fn test_same_bytes_different_extension_are_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let pdf = store.attach(&source(&src_dir, "a.pdf", OWLS)).unwrap();
        let mp4 = store.attach(&source(&src_dir, "a.mp4", OWLS)).unwrap();
        assert_ne!(pdf, mp4);
        assert!(store.contains(&pdf));
        assert!(store.contains(&mp4));
    }

    #[test]
    fn test_attach_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let key = store.attach(&source(&src_dir, "README", OWL)).unwrap();
        assert_eq!(key.extension, "");
        assert_eq!(key.name(), key.digest.to_hex());
    }

    #[test]
    fn test_attach_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();
        let err = store
            .attach(&temp_dir.path().join("nope.pdf"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreIo);
    }

    #[test]
    fn test_release_deletes_last_reference() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();
        let src = source(&src_dir, "test_2.mp4", OWL);

        let key = store.attach(&src).unwrap();
        store.attach(&src).unwrap();

        assert!(!store.release(&key).unwrap());
        assert!(store.contains(&key));

        assert!(store.release(&key).unwrap());
        assert!(!store.contains(&key));

        // both shard directories were empty and are gone
        let [first, _] = key.digest.shard();
        assert!(!temp_dir.path().join(first).exists());
    }

    #[test]
    fn test_unwritable_journal_does_not_leak_references() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        // a directory in place of the journal makes every append fail
        let journal = temp_dir.path().join("journal");
        fs::remove_file(&journal).unwrap();
        fs::create_dir(&journal).unwrap();

        let key = store.attach(&source(&src_dir, "test_1.pdf", OWLS)).unwrap();
        assert_eq!(store.ref_count(&key), 1);
        assert!(store.contains(&key));

        assert!(store.release(&key).unwrap());
        assert_eq!(store.ref_count(&key), 0);
        assert!(!store.contains(&key));
    }

    #[test]
    fn test_release_keeps_shared_shard_directory() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let pdf = store.attach(&source(&src_dir, "a.pdf", OWLS)).unwrap();
        let mp4 = store.attach(&source(&src_dir, "a.mp4", OWLS)).unwrap();

        assert!(store.release(&pdf).unwrap());
        assert!(store.blob_path(&mp4).parent().unwrap().is_dir());
        assert!(store.contains(&mp4));
    }

    #[test]
    fn test_journal_records_operations() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let key = store.attach(&source(&src_dir, "a.pdf", OWLS)).unwrap();
        store.attach(&source(&src_dir, "b.pdf", OWLS)).unwrap();
        store.release(&key).unwrap();
        store.release(&key).unwrap();

        let ops: Vec<_> = store
            .journal()
            .read_recent(10)
            .unwrap()
            .into_iter()
            .map(|e| e.operation.to_string())
            .collect();
        assert_eq!(ops, vec!["attach", "attach", "release", "delete"]);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = ContentCopyStore::init(temp_dir.path()).unwrap();

        let key = store.attach(&source(&src_dir, "a.pdf", OWLS)).unwrap();
        fs::write(store.blob_path(&key), b"tampered").unwrap();
        assert!(!store.verify(&key).unwrap());

        let missing = BlobKey::new(Digest::hash_bytes(b"absent"), ".pdf");
        assert_eq!(store.verify(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_concurrent_attach_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let src_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(ContentCopyStore::init(temp_dir.path()).unwrap());
        let src = source(&src_dir, "a.pdf", OWLS);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                let src = src.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let key = store.attach(&src).unwrap();
                        store.release(&key).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let key = BlobKey::new(Digest::hash_bytes(OWLS), ".pdf");
        assert_eq!(store.ref_count(&key), 0);
        assert!(!store.contains(&key));
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Attached bytes read back unchanged and are named by their digest
        #[test]
        fn prop_attach_preserves_bytes(data in prop::collection::vec(any::<u8>(), 0..20_000)) {
            let temp_dir = TempDir::new().unwrap();
            let src_dir = TempDir::new().unwrap();
            let store = ContentCopyStore::init(temp_dir.path()).unwrap();

            let key = store.attach(&source(&src_dir, "blob.bin", &data)).unwrap();
            prop_assert_eq!(key.digest, Digest::hash_bytes(&data));
            prop_assert_eq!(fs::read(store.blob_path(&key)).unwrap(), data);
        }
    }
}
