//! The library: attached channels plus the shared content-copy store.

use crate::channel::ChannelDb;
use crate::config::LibraryConfig;
use crate::edges::EdgeChange;
use crate::error::{Error, Result};
use crate::gc::{GcStats, Orphan};
use crate::manifest::{ChannelManifest, ImportSummary};
use crate::model::{ChannelId, ContentKind, ContentMetadata, File, Format};
use crate::refcount::BlobKey;
use crate::reference::{ContentIds, ContentRef};
use crate::store::ContentCopyStore;
use crate::traverse::FormatScope;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for every channel and content-copy operation.
///
/// Blob reference counts cover the File rows of attached channels only.
/// Channels found in the channel directory are attached by [`Library::open`].
#[derive(Debug)]
pub struct Library {
    config: LibraryConfig,
    store: ContentCopyStore,
    channels: DashMap<ChannelId, Arc<ChannelDb>>,
}

impl Library {
    /// Open the store and attach every channel database in the channel directory.
    pub fn open(config: LibraryConfig) -> Result<Self> {
        fs::create_dir_all(&config.channel_dir)?;
        let store = ContentCopyStore::open_or_init(&config.content_copy_dir)?;

        let library = Self {
            config,
            store,
            channels: DashMap::new(),
        };

        for channel_id in library.discover()? {
            library.attach_channel(&channel_id)?;
        }
        Ok(library)
    }

    /// Open the library under `home`, honoring `home/shelf.toml`.
    pub fn open_home(home: impl AsRef<Path>) -> Result<Self> {
        Self::open(LibraryConfig::load(home)?)
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn store(&self) -> &ContentCopyStore {
        &self.store
    }

    /// Channel ids with a database file in the channel directory.
    fn discover(&self) -> Result<Vec<ChannelId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.config.channel_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sqlite3") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ChannelId::new(stem) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping database"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Attach the channel database stored in the channel directory.
    pub fn attach_channel(&self, channel_id: &ChannelId) -> Result<Arc<ChannelDb>> {
        if let Some(db) = self.channels.get(channel_id) {
            return Ok(Arc::clone(&db));
        }
        let path = self.config.channel_path(channel_id);
        if !path.exists() {
            return Err(Error::channel_not_found(channel_id.as_str()));
        }
        let db = ChannelDb::open(channel_id.clone(), &path)?;
        self.add_channel(db)
    }

    /// Attach an already opened channel database.
    ///
    /// Reference counts are rebuilt from the channel's File rows.
    pub fn add_channel(&self, db: ChannelDb) -> Result<Arc<ChannelDb>> {
        let channel_id = db.channel_id().clone();
        let slot = match self.channels.entry(channel_id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::constraint(format!(
                    "channel {} is already attached",
                    channel_id
                )));
            }
            Entry::Vacant(slot) => slot,
        };

        let db = Arc::new(db.with_cycle_policy(self.config.prerequisite_cycles));
        let keys = copy_keys(&db)?;
        for key in &keys {
            self.store.retain(key);
        }
        slot.insert(Arc::clone(&db));

        info!(channel = %channel_id, content_copies = keys.len(), "attached channel");
        Ok(db)
    }

    /// Detach a channel, dropping its references without deleting blobs.
    pub fn detach_channel(&self, channel_id: &ChannelId) -> Result<()> {
        let (_, db) = self
            .channels
            .remove(channel_id)
            .ok_or_else(|| Error::channel_not_found(channel_id.as_str()))?;
        for key in copy_keys(&db)? {
            self.store.forget(&key);
        }
        info!(channel = %channel_id, "detached channel");
        Ok(())
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Result<Arc<ChannelDb>> {
        self.channels
            .get(channel_id)
            .map(|db| Arc::clone(&db))
            .ok_or_else(|| Error::channel_not_found(channel_id.as_str()))
    }

    /// Attached channel ids, sorted.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Create the channel database from a manifest and attach it.
    pub fn import_manifest(&self, manifest: &ChannelManifest) -> Result<ImportSummary> {
        let channel_id = &manifest.channel.channel_id;
        let path = self.config.channel_path(channel_id);
        if self.channels.contains_key(channel_id) || path.exists() {
            return Err(Error::invalid_manifest(format!(
                "channel {} already exists",
                channel_id
            )));
        }
        manifest.validate()?;

        let db = ChannelDb::open(channel_id.clone(), &path)?
            .with_cycle_policy(self.config.prerequisite_cycles);
        let summary = match manifest.import_into(&db) {
            Ok(summary) => summary,
            Err(e) => {
                drop(db);
                remove_database(&path);
                return Err(e);
            }
        };
        self.add_channel(db)?;
        Ok(summary)
    }

    // === Content graph ===

    pub fn immediate_children(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.immediate_children(content)
    }

    pub fn get_ancestor_topics(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.get_ancestor_topics(content)
    }

    pub fn leaves(&self, channel: &ChannelId, content: &ContentRef) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.leaves(content)
    }

    pub fn children_of_kind(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
        kind: ContentKind,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.children_of_kind(content, kind)
    }

    pub fn get_all_formats(&self, channel: &ChannelId, content: &ContentRef) -> Result<Vec<Format>> {
        self.formats(channel, content, FormatScope::All)
    }

    pub fn get_possible_formats(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<Format>> {
        self.formats(channel, content, FormatScope::Possible)
    }

    pub fn get_available_formats(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<Format>> {
        self.formats(channel, content, FormatScope::Available)
    }

    pub fn formats(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
        scope: FormatScope,
    ) -> Result<Vec<Format>> {
        self.channel(channel)?.formats(content, scope)
    }

    pub fn get_files_for_quality(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
        quality: &str,
    ) -> Result<Vec<File>> {
        self.channel(channel)?.get_files_for_quality(content, quality)
    }

    pub fn get_missing_files(&self, channel: &ChannelId, content: &ContentRef) -> Result<Vec<File>> {
        self.channel(channel)?.get_missing_files(content)
    }

    pub fn get_content_with_id(
        &self,
        channel: &ChannelId,
        ids: &ContentIds,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.get_content_with_id(ids)
    }

    pub fn set_prerequisite(
        &self,
        channel: &ChannelId,
        prerequisite: &ContentRef,
        content: &ContentRef,
    ) -> Result<()> {
        self.channel(channel)?.set_prerequisite(prerequisite, content)
    }

    pub fn set_is_related(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
        related: &ContentRef,
    ) -> Result<EdgeChange> {
        self.channel(channel)?.set_is_related(content, related)
    }

    pub fn get_all_prerequisites(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.get_all_prerequisites(content)
    }

    pub fn get_all_related(
        &self,
        channel: &ChannelId,
        content: &ContentRef,
    ) -> Result<Vec<ContentMetadata>> {
        self.channel(channel)?.get_all_related(content)
    }

    // === Content copies ===

    /// Point a File row at a copy of `source`, or clear its copy with `None`.
    ///
    /// The new blob is materialized and counted before the row is written;
    /// the previous blob is released after. Clearing always blanks the
    /// checksum, extension and copy columns, whether or not a copy existed.
    /// If the row write fails `file` is left as it was and no reference is
    /// leaked.
    pub fn update_content_copy(
        &self,
        channel: &ChannelId,
        file: &mut File,
        source: Option<&Path>,
    ) -> Result<()> {
        let db = self.channel(channel)?;

        let mut updated = file.clone();
        let attached = match source {
            Some(source) => {
                let key = self.store.attach(source)?;
                updated.checksum = Some(key.digest.to_hex());
                updated.extension = Some(key.extension.clone());
                updated.content_copy = Some(self.store.relative_path(&key));
                Some(key)
            }
            None => {
                updated.clear_content_copy();
                None
            }
        };

        let previous = match db.swap_file_copy(&updated) {
            Ok(previous) => previous,
            Err(e) => {
                if let Some(key) = &attached
                    && let Err(release_err) = self.store.release(key)
                {
                    warn!(blob = %key, error = %release_err, "failed to release after row update failed");
                }
                return Err(e);
            }
        };

        *file = File {
            file_size: previous.file_size,
            format: previous.format,
            ..updated
        };

        // the row is committed; a failed release leaves an orphan for gc
        match BlobKey::from_file(&previous) {
            Ok(Some(old)) => {
                if let Err(e) = self.store.release(&old) {
                    warn!(blob = %old, error = %e, "failed to release previous content copy");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(file = previous.id, error = %e, "previous content copy has a bad checksum"),
        }
        Ok(())
    }

    /// Same as [`Library::update_content_copy`], addressing the row by id.
    pub fn update_content_copy_by_id(
        &self,
        channel: &ChannelId,
        file_id: i64,
        source: Option<&Path>,
    ) -> Result<File> {
        let mut file = self.channel(channel)?.file(file_id)?;
        self.update_content_copy(channel, &mut file, source)?;
        Ok(file)
    }

    /// Absolute path of a File's content copy, if it has one.
    pub fn content_copy_path(&self, file: &File) -> Result<Option<PathBuf>> {
        Ok(BlobKey::from_file(file)?.map(|key| self.store.blob_path(&key)))
    }

    /// Collect blobs that no attached channel references.
    pub fn gc(&self, dry_run: bool) -> Result<GcStats> {
        self.store.gc(dry_run)
    }

    pub fn orphans(&self) -> Result<Vec<Orphan>> {
        self.store.orphans()
    }
}

/// Keys of every content copy held by the channel's File rows.
fn copy_keys(db: &ChannelDb) -> Result<Vec<BlobKey>> {
    let mut keys = Vec::new();
    for file in db.files_with_content_copy()? {
        match BlobKey::from_file(&file)? {
            Some(key) => keys.push(key),
            None => warn!(channel = %db.channel_id(), file = file.id, "file row has an unreadable content copy"),
        }
    }
    Ok(keys)
}

/// Remove a database file left by a failed import, with its WAL companions.
fn remove_database(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        let _ = fs::remove_file(PathBuf::from(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixture::{self, id};
    use crate::hash::Digest;
    use serde_json::json;
    use tempfile::TempDir;

    const OWLS: &[u8] = b"The owls are not what they seem";
    const OWL: &[u8] = b"The owl are not what they seem";

    struct Sources {
        _dir: TempDir,
        pdf: PathBuf,
        mp4: PathBuf,
    }

    fn sources() -> Sources {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("test_1.pdf");
        let mp4 = dir.path().join("test_2.mp4");
        fs::write(&pdf, OWLS).unwrap();
        fs::write(&mp4, OWL).unwrap();
        Sources { _dir: dir, pdf, mp4 }
    }

    fn shard_dir(library: &Library, data: &[u8]) -> PathBuf {
        let [first, second] = Digest::hash_bytes(data).shard();
        library.store().root().join(first).join(second)
    }

    fn file_in_format(library: &Library, format: i64, nth: usize) -> File {
        let db = library.channel(&fixture::channel_id()).unwrap();
        let files: Vec<File> = (1..=4)
            .map(|i| db.file(i).unwrap())
            .filter(|f| f.format == format)
            .collect();
        files[nth].clone()
    }

    #[test]
    fn test_open_creates_layout() {
        let home = TempDir::new().unwrap();
        let library = Library::open(LibraryConfig::for_home(home.path())).unwrap();

        assert!(home.path().join("content/databases").is_dir());
        assert!(home.path().join("content/storage/config").is_file());
        assert!(library.channels().is_empty());
    }

    #[test]
    fn test_import_and_reopen() {
        let home = TempDir::new().unwrap();
        {
            let library = fixture::content_test_library(home.path());
            assert_eq!(library.channels(), vec![fixture::channel_id()]);
        }

        let library = Library::open_home(home.path()).unwrap();
        assert_eq!(library.channels(), vec![fixture::channel_id()]);
        let kids = library
            .immediate_children(&fixture::channel_id(), &id("root").into())
            .unwrap();
        assert_eq!(kids.len(), 2);
    }

    #[test]
    fn test_import_twice_rejected() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let err = library
            .import_manifest(&fixture::content_test_manifest())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_failed_import_leaves_no_database() {
        let home = TempDir::new().unwrap();
        let library = Library::open(LibraryConfig::for_home(home.path())).unwrap();

        let mut manifest = fixture::content_test_manifest();
        manifest.prerequisites.push(crate::manifest::PrerequisiteEdge {
            prerequisite: id("c1"),
            content: id("root"),
        });
        assert!(library.import_manifest(&manifest).is_err());
        assert!(library.channels().is_empty());
        assert!(!library.config().channel_path(&fixture::channel_id()).exists());
    }

    #[test]
    fn test_unknown_channel() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let other = ChannelId::new("elsewhere").unwrap();

        let err = library.leaves(&other, &id("root").into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            library.attach_channel(&other).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_endpoint_orders() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();

        let titles = |nodes: Vec<ContentMetadata>| -> Vec<String> {
            nodes.into_iter().map(|n| n.title).collect()
        };

        assert_eq!(
            titles(library.get_ancestor_topics(&ch, &id("c1").into()).unwrap()),
            vec!["root"]
        );
        assert_eq!(
            titles(library.leaves(&ch, &id("root").into()).unwrap()),
            vec!["c1", "c2c1", "c2c2", "c2c3"]
        );
        assert_eq!(
            titles(library.get_all_prerequisites(&ch, &id("c1").into()).unwrap()),
            vec!["root"]
        );
        assert_eq!(
            titles(library.get_all_related(&ch, &id("c1").into()).unwrap()),
            vec!["c2"]
        );
        assert_eq!(
            titles(
                library
                    .children_of_kind(&ch, &id("root").into(), ContentKind::Topic)
                    .unwrap()
            ),
            vec!["c2", "c2c2", "c2c3"]
        );

        let sizes: Vec<_> = library
            .get_possible_formats(&ch, &id("c1").into())
            .unwrap()
            .into_iter()
            .map(|f| f.format_size)
            .collect();
        assert_eq!(sizes, vec![102, 51]);
        assert_eq!(
            library.get_all_formats(&ch, &id("c2").into()).unwrap()[0].format_size,
            46
        );
        assert!(
            library
                .get_available_formats(&ch, &id("c2").into())
                .unwrap()
                .is_empty()
        );

        let missing = library.get_missing_files(&ch, &id("c1").into()).unwrap();
        assert_eq!(missing[0].format, fixture::FORMAT_HIGH);
        assert_eq!(missing[1].format, fixture::FORMAT_LOW);

        let quality = library
            .get_files_for_quality(&ch, &id("c1").into(), "high")
            .unwrap();
        assert_eq!(quality[0].format, fixture::FORMAT_HIGH);
    }

    #[test]
    fn test_loosely_typed_content_is_type_kind() {
        let err = ContentRef::from_value(&json!(432)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeKind);
        let err = File::from_value(&json!(null)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeKind);
    }

    #[test]
    fn test_set_edges_through_library() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();

        let root: ContentRef = id("root").into();
        assert!(library.get_all_prerequisites(&ch, &root).unwrap().is_empty());
        library
            .set_prerequisite(&ch, &id("c2").into(), &root)
            .unwrap();
        assert!(!library.get_all_prerequisites(&ch, &root).unwrap().is_empty());

        assert_eq!(
            library
                .set_is_related(&ch, &id("c1").into(), &root)
                .unwrap(),
            EdgeChange::Created
        );
        assert_eq!(
            library
                .set_is_related(&ch, &root, &id("c1").into())
                .unwrap(),
            EdgeChange::Unchanged
        );
    }

    #[test]
    fn test_transitive_policy_from_config() {
        let home = TempDir::new().unwrap();
        fs::write(
            home.path().join("shelf.toml"),
            "prerequisite_cycles = \"transitive\"\n",
        )
        .unwrap();
        let library = Library::open_home(home.path()).unwrap();
        library
            .import_manifest(&fixture::content_test_manifest())
            .unwrap();
        let ch = fixture::channel_id();

        library
            .set_prerequisite(&ch, &id("c2").into(), &id("root").into())
            .unwrap();
        let err = library
            .set_prerequisite(&ch, &id("c1").into(), &id("c2").into())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_get_content_with_id() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ids = ContentIds::from_value(&json!([
            id("c2c2").to_string(),
            id("root").to_string(),
            id("c1").to_string()
        ]))
        .unwrap();
        let nodes = library
            .get_content_with_id(&fixture::channel_id(), &ids)
            .unwrap();
        let titles: Vec<_> = nodes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["root", "c1", "c2c2"]);
    }

    #[test]
    fn test_update_content_copy_scenario() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();
        let src = sources();

        let mut file_1 = file_in_format(&library, fixture::FORMAT_HIGH, 0);
        let mut file_2 = file_in_format(&library, fixture::FORMAT_LOW, 0);
        let mut file_3 = file_in_format(&library, fixture::FORMAT_EXERCISE, 1);
        assert_eq!(file_1.to_string(), "09293abba61d4fcfa4e3bd804bcaba43.pdf");

        // the same bytes twice: one blob
        library
            .update_content_copy(&ch, &mut file_1, Some(&src.pdf))
            .unwrap();
        library
            .update_content_copy(&ch, &mut file_3, Some(&src.pdf))
            .unwrap();
        assert_eq!(fs::read_dir(shard_dir(&library, OWLS)).unwrap().count(), 1);
        assert_eq!(file_1.content_copy, file_3.content_copy);
        assert_eq!(file_1.checksum.as_deref(), Some(Digest::hash_bytes(OWLS).to_hex().as_str()));

        // swap file_3 to other bytes
        assert_eq!(file_3.extension.as_deref(), Some(".pdf"));
        library
            .update_content_copy(&ch, &mut file_3, Some(&src.mp4))
            .unwrap();
        assert_eq!(file_3.extension.as_deref(), Some(".mp4"));

        // file_2 shares the mp4 copy; clearing it keeps the blob
        library
            .update_content_copy(&ch, &mut file_2, Some(&src.mp4))
            .unwrap();
        assert!(file_2.has_content_copy());
        library.update_content_copy(&ch, &mut file_2, None).unwrap();
        assert!(!file_2.has_content_copy());
        assert!(file_2.checksum.is_none());

        let mp4_path = library.content_copy_path(&file_3).unwrap().unwrap();
        assert!(mp4_path.is_file());
        assert_eq!(fs::read(&mp4_path).unwrap(), OWL);

        // last reference gone: blob deleted
        library.update_content_copy(&ch, &mut file_3, None).unwrap();
        assert!(!mp4_path.exists());
        assert!(!file_3.has_content_copy());

        // clearing again is a silent no-op
        library.update_content_copy(&ch, &mut file_2, None).unwrap();
        library.update_content_copy(&ch, &mut file_3, None).unwrap();

        // the pdf copy survives through file_1
        let pdf_path = library.content_copy_path(&file_1).unwrap().unwrap();
        assert!(pdf_path.is_file());
        assert_eq!(library.store().ref_count(&BlobKey::from_file(&file_1).unwrap().unwrap()), 1);
    }

    #[test]
    fn test_clear_without_copy_blanks_checksum() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();

        let mut file = library.channel(&ch).unwrap().file(1).unwrap();
        assert_eq!(file.checksum.as_deref(), Some("09293abba61d4fcfa4e3bd804bcaba43"));
        assert!(!file.has_content_copy());

        library.update_content_copy(&ch, &mut file, None).unwrap();
        assert!(file.checksum.is_none());
        assert!(file.extension.is_none());
        assert_eq!(file.file_size, 31);

        let row = library.channel(&ch).unwrap().file(1).unwrap();
        assert_eq!(row, file);

        // again, on the already blank row
        library.update_content_copy(&ch, &mut file, None).unwrap();
        assert_eq!(library.channel(&ch).unwrap().file(1).unwrap(), row);
    }

    #[test]
    fn test_update_with_unwritable_journal() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();
        let src = sources();

        let journal = library.store().root().join("journal");
        fs::remove_file(&journal).unwrap();
        fs::create_dir(&journal).unwrap();

        let mut file = library.channel(&ch).unwrap().file(3).unwrap();
        library
            .update_content_copy(&ch, &mut file, Some(&src.pdf))
            .unwrap();
        let key = BlobKey::from_file(&file).unwrap().unwrap();
        assert_eq!(library.channel(&ch).unwrap().file(3).unwrap(), file);
        assert_eq!(library.store().ref_count(&key), 1);

        // swapping to other bytes releases the old blob and keeps file in sync
        library
            .update_content_copy(&ch, &mut file, Some(&src.mp4))
            .unwrap();
        assert_eq!(library.channel(&ch).unwrap().file(3).unwrap(), file);
        assert_eq!(library.store().ref_count(&key), 0);
        assert!(!library.store().contains(&key));

        library.update_content_copy(&ch, &mut file, None).unwrap();
        assert!(!file.has_content_copy());
        assert_eq!(library.gc(true).unwrap().blobs_deleted, 0);
    }

    #[test]
    fn test_update_content_copy_persists_row() {
        let home = TempDir::new().unwrap();
        let src = sources();
        let ch = fixture::channel_id();
        {
            let library = fixture::content_test_library(home.path());
            let file = library
                .update_content_copy_by_id(&ch, 3, Some(&src.pdf))
                .unwrap();
            assert!(file.has_content_copy());
            assert!(
                library
                    .get_available_formats(&ch, &id("c2").into())
                    .unwrap()
                    .iter()
                    .any(|f| f.format_size == 46)
            );
        }

        // counts are rebuilt on reopen, so the blob is protected from gc
        let library = Library::open_home(home.path()).unwrap();
        let file = library.channel(&ch).unwrap().file(3).unwrap();
        let key = BlobKey::from_file(&file).unwrap().unwrap();
        assert_eq!(library.store().ref_count(&key), 1);
        assert_eq!(library.gc(false).unwrap().blobs_deleted, 0);
        assert!(library.store().contains(&key));
    }

    #[test]
    fn test_update_same_source_twice_on_one_row() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let src = sources();
        let ch = fixture::channel_id();

        let first = library
            .update_content_copy_by_id(&ch, 4, Some(&src.pdf))
            .unwrap();
        let second = library
            .update_content_copy_by_id(&ch, 4, Some(&src.pdf))
            .unwrap();
        assert_eq!(first, second);

        let key = BlobKey::from_file(&second).unwrap().unwrap();
        assert_eq!(library.store().ref_count(&key), 1);
        assert!(library.store().contains(&key));
    }

    #[test]
    fn test_update_unknown_file_releases_new_blob() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let src = sources();

        let mut ghost = File {
            id: 99,
            format: fixture::FORMAT_HIGH,
            checksum: None,
            extension: None,
            file_size: 0,
            content_copy: None,
        };
        let before = ghost.clone();
        let err = library
            .update_content_copy(&fixture::channel_id(), &mut ghost, Some(&src.pdf))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(ghost, before);

        let key = BlobKey::new(Digest::hash_bytes(OWLS), ".pdf");
        assert_eq!(library.store().ref_count(&key), 0);
        assert!(!library.store().contains(&key));
    }

    #[test]
    fn test_update_missing_source_leaves_row() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let ch = fixture::channel_id();

        let mut file = library.channel(&ch).unwrap().file(2).unwrap();
        let before = file.clone();
        let err = library
            .update_content_copy(&ch, &mut file, Some(Path::new("/nonexistent/owl.mp4")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreIo);
        assert_eq!(file, before);
        assert_eq!(library.channel(&ch).unwrap().file(2).unwrap(), before);
    }

    #[test]
    fn test_references_across_channels() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let src = sources();

        let mut other = fixture::content_test_manifest();
        other.channel.channel_id = ChannelId::new("content_copy").unwrap();
        library.import_manifest(&other).unwrap();

        let a = library
            .update_content_copy_by_id(&fixture::channel_id(), 1, Some(&src.pdf))
            .unwrap();
        let b = library
            .update_content_copy_by_id(&other.channel.channel_id, 1, Some(&src.pdf))
            .unwrap();
        assert_eq!(a.content_copy, b.content_copy);

        library
            .update_content_copy_by_id(&fixture::channel_id(), 1, None)
            .unwrap();
        let path = library.content_copy_path(&b).unwrap().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_detach_forgets_references() {
        let home = TempDir::new().unwrap();
        let library = fixture::content_test_library(home.path());
        let src = sources();
        let ch = fixture::channel_id();

        let file = library
            .update_content_copy_by_id(&ch, 1, Some(&src.pdf))
            .unwrap();
        let key = BlobKey::from_file(&file).unwrap().unwrap();

        library.detach_channel(&ch).unwrap();
        assert_eq!(library.store().ref_count(&key), 0);
        assert!(library.store().contains(&key));
        assert_eq!(library.orphans().unwrap().len(), 1);

        library.attach_channel(&ch).unwrap();
        assert_eq!(library.store().ref_count(&key), 1);
        assert!(library.orphans().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_updates_share_one_blob() {
        let home = TempDir::new().unwrap();
        let library = Arc::new(fixture::content_test_library(home.path()));
        let src = sources();
        let ch = fixture::channel_id();

        let handles: Vec<_> = (1..=4)
            .map(|file_id| {
                let library = Arc::clone(&library);
                let ch = ch.clone();
                let pdf = src.pdf.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        library
                            .update_content_copy_by_id(&ch, file_id, Some(&pdf))
                            .unwrap();
                        library.update_content_copy_by_id(&ch, file_id, None).unwrap();
                    }
                    library
                        .update_content_copy_by_id(&ch, file_id, Some(&pdf))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let key = BlobKey::new(Digest::hash_bytes(OWLS), ".pdf");
        assert_eq!(library.store().ref_count(&key), 4);
        assert_eq!(fs::read_dir(shard_dir(&library, OWLS)).unwrap().count(), 1);
    }
}
