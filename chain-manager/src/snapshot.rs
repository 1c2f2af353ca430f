//! Snapshot Manager: archive/restore of a chain's data directory, with a
//! persistent index of described snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;

use crate::error::{Error, Result};
use crate::types::{ChainType, SnapshotDetails};

/// Archive-based, indexable snapshots of a chain's data directory. The
/// index is a small embedded KV store (`sled`; not a teacher dependency,
/// sourced from the pack's own use of `sled` for exactly this kind of
/// store, e.g. `robust34-forest`'s `ipld/blockstore`); archives
/// themselves live as plain `.tgz` files under `snapshot_base_path`.
#[derive(Clone)]
pub struct SnapshotManager {
    base_path: PathBuf,
    index: Arc<sled::Db>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("base_path", &self.base_path)
            .finish()
    }
}

impl SnapshotManager {
    pub fn open(base_path: PathBuf, index_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(&base_path).map_err(|source| Error::Io {
            path: base_path.clone(),
            source,
        })?;
        let index = sled::open(index_path)
            .map_err(|e| Error::Fatal(format!("opening snapshot index at {}: {}", index_path.display(), e)))?;
        let manager = Self {
            base_path,
            index: Arc::new(index),
        };
        manager.repair()?;
        Ok(manager)
    }

    /// Archives `db_path` into a freshly-generated `<id>.tgz`. If
    /// `description` is non-empty the snapshot is indexed; an empty
    /// description means the archive is kept on disk but left out of
    /// `list`/`by_id` (a "transient" snapshot, per `spec.md` §3).
    pub fn take(&self, chain_type: ChainType, db_path: &Path, description: &str) -> Result<SnapshotDetails> {
        let id = loop {
            let candidate = rand::thread_rng().gen::<u64>().to_string();
            let path = self.archive_path(&candidate);
            if !path.exists() && !self.index.contains_key(candidate.as_bytes()).unwrap_or(false) {
                break candidate;
            }
        };
        let archive_path = self.archive_path(&id);

        let file = std::fs::File::create(&archive_path).map_err(|source| Error::Io {
            path: archive_path.clone(),
            source,
        })?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(".", db_path)
            .map_err(|e| Error::SnapshotFailure(format!("archiving {}: {}", db_path.display(), e)))?;
        builder
            .into_inner()
            .and_then(|enc| enc.finish())
            .map_err(|e| Error::SnapshotFailure(format!("finalizing archive: {}", e)))?;

        let details = SnapshotDetails {
            id: id.clone(),
            chain_type,
            description: description.to_string(),
            path: archive_path,
            created_at: chrono::Utc::now(),
        };

        if !description.is_empty() {
            self.store(&details)?;
        }
        Ok(details)
    }

    /// Extracts `details.path` over `db_path`, which is cleared first so
    /// the archive always yields a launchable chain regardless of
    /// leftover state.
    pub fn restore(&self, details: &SnapshotDetails, db_path: &Path) -> Result<()> {
        if !details.path.exists() {
            return Err(Error::SnapshotFailure(format!(
                "missing_archive: {}",
                details.path.display()
            )));
        }
        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|source| Error::Io {
                path: db_path.to_path_buf(),
                source,
            })?;
        }
        std::fs::create_dir_all(db_path).map_err(|source| Error::Io {
            path: db_path.to_path_buf(),
            source,
        })?;

        let file = std::fs::File::open(&details.path).map_err(|source| Error::Io {
            path: details.path.clone(),
            source,
        })?;
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive
            .unpack(db_path)
            .map_err(|e| Error::SnapshotFailure(format!("extracting {}: {}", details.path.display(), e)))?;
        Ok(())
    }

    pub fn by_id(&self, snapshot_id: &str) -> Result<Option<SnapshotDetails>> {
        match self.index.get(snapshot_id.as_bytes()) {
            Ok(Some(bytes)) => {
                let details: SnapshotDetails = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Fatal(format!("corrupt snapshot index entry {}: {}", snapshot_id, e)))?;
                if !details.path.exists() {
                    return Err(Error::SnapshotFailure(format!("missing_archive: {}", snapshot_id)));
                }
                Ok(Some(details))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Fatal(format!("reading snapshot index: {}", e))),
        }
    }

    pub fn by_chain(&self, chain_type: ChainType) -> Result<Vec<SnapshotDetails>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.chain_type == chain_type)
            .collect())
    }

    /// Deletes both the archive file and the index entry. Ordering:
    /// file first, then index, so a crash between the two steps only
    /// ever leaves a stale index entry, which is tolerated and cleaned up
    /// by `repair` on next startup (`spec.md` §3).
    pub fn remove(&self, snapshot_id: &str) -> Result<()> {
        if let Some(details) = self.by_id(snapshot_id).unwrap_or(None) {
            let _ = std::fs::remove_file(&details.path);
        }
        self.index
            .remove(snapshot_id.as_bytes())
            .map_err(|e| Error::Fatal(format!("removing snapshot index entry: {}", e)))?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<SnapshotDetails>> {
        let mut result = Vec::new();
        for entry in self.index.iter() {
            let (_, bytes) = entry.map_err(|e| Error::Fatal(format!("scanning snapshot index: {}", e)))?;
            let details: SnapshotDetails = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Fatal(format!("corrupt snapshot index entry: {}", e)))?;
            if details.path.exists() {
                result.push(details);
            }
        }
        Ok(result)
    }

    /// Drops index entries whose archive is missing. Run once at
    /// startup to uphold the invariant that every indexed
    /// `SnapshotDetails` has a file on disk (`spec.md` §3).
    fn repair(&self) -> Result<()> {
        let mut stale = Vec::new();
        for entry in self.index.iter() {
            let (key, bytes) = entry.map_err(|e| Error::Fatal(format!("scanning snapshot index: {}", e)))?;
            if let Ok(details) = serde_json::from_slice::<SnapshotDetails>(&bytes) {
                if !details.path.exists() {
                    stale.push((key.to_vec(), details.id));
                }
            }
        }
        for (key, id) in stale {
            log::warn!("dropping snapshot index entry {} with missing archive", id);
            let _ = self.index.remove(key);
        }
        Ok(())
    }

    fn store(&self, details: &SnapshotDetails) -> Result<()> {
        let bytes = serde_json::to_vec(details)
            .map_err(|e| Error::Fatal(format!("serializing snapshot details: {}", e)))?;
        self.index
            .insert(details.id.as_bytes(), bytes)
            .map_err(|e| Error::Fatal(format!("writing snapshot index: {}", e)))?;
        Ok(())
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.tgz", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (SnapshotManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(
            dir.path().join("archives"),
            &dir.path().join("index"),
        )
        .unwrap();
        (manager, dir)
    }

    #[test]
    fn take_with_description_is_indexed_and_restorable() {
        let (manager, dir) = manager();
        let db_path = dir.path().join("chain-data");
        std::fs::create_dir_all(&db_path).unwrap();
        std::fs::write(db_path.join("keystore.json"), b"secret").unwrap();

        let details = manager.take(ChainType::Geth, &db_path, "pre-upgrade").unwrap();
        assert!(details.path.exists());
        assert_eq!(manager.by_id(&details.id).unwrap(), Some(details.clone()));
        assert_eq!(manager.list().unwrap().len(), 1);

        std::fs::remove_dir_all(&db_path).unwrap();
        manager.restore(&details, &db_path).unwrap();
        assert_eq!(
            std::fs::read(db_path.join("keystore.json")).unwrap(),
            b"secret"
        );
    }

    #[test]
    fn take_without_description_is_transient() {
        let (manager, dir) = manager();
        let db_path = dir.path().join("chain-data");
        std::fs::create_dir_all(&db_path).unwrap();

        let details = manager.take(ChainType::Ganache, &db_path, "").unwrap();
        assert!(details.path.exists());
        assert_eq!(manager.by_id(&details.id).unwrap(), None);
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_file_and_index_entry() {
        let (manager, dir) = manager();
        let db_path = dir.path().join("chain-data");
        std::fs::create_dir_all(&db_path).unwrap();

        let details = manager.take(ChainType::Geth, &db_path, "to remove").unwrap();
        manager.remove(&details.id).unwrap();
        assert!(!details.path.exists());
        assert_eq!(manager.by_id(&details.id).unwrap(), None);
    }

    #[test]
    fn repair_drops_index_entries_with_missing_archives() {
        let dir = tempfile::tempdir().unwrap();
        let archives = dir.path().join("archives");
        let index_path = dir.path().join("index");
        std::fs::create_dir_all(&archives).unwrap();
        {
            let manager = SnapshotManager::open(archives.clone(), &index_path).unwrap();
            let db_path = dir.path().join("chain-data");
            std::fs::create_dir_all(&db_path).unwrap();
            let details = manager.take(ChainType::Geth, &db_path, "will vanish").unwrap();
            std::fs::remove_file(&details.path).unwrap();
        }
        // Reopening triggers the repair scan.
        let manager = SnapshotManager::open(archives, &index_path).unwrap();
        assert!(manager.list().unwrap().is_empty());
    }
}
