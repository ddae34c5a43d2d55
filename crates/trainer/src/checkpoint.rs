use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};

const INDEX_FILE: &str = "checkpoint.json";
const PREFIX: &str = "ckpt-";
const EXTENSION: &str = "ckpt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub version: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    latest: Option<u64>,
    /// Retained versions, oldest first.
    versions: Vec<u64>,
}

/// Versioned model snapshots in one directory, newest `max_to_keep` retained.
///
/// `checkpoint.json` lists the retained versions. It is replaced atomically
/// after a snapshot lands and before old files are deleted, so it never names a
/// file that does not exist.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_to_keep: usize,
    index: CheckpointIndex,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>, max_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = match fs::read_to_string(&index_path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == ErrorKind::NotFound => scan(&dir)?,
            Err(e) => return Err(e.into()),
        };

        if let Some(latest) = index.latest {
            info!("Found checkpoint version {} in {}", latest, dir.display());
        }

        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
            index,
        })
    }

    pub fn latest(&self) -> Option<Checkpoint> {
        self.index.latest.map(|version| Checkpoint {
            version,
            path: self.path_for(version),
        })
    }

    /// Retained versions, oldest first.
    pub fn versions(&self) -> &[u64] {
        &self.index.versions
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the next version through `write`, then evicts the oldest
    /// snapshots beyond `max_to_keep`.
    ///
    /// `write` receives a temporary path; the snapshot only becomes visible once
    /// it has returned successfully.
    pub fn save<F>(&mut self, write: F) -> Result<Checkpoint>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>,
    {
        let version = self.index.latest.map_or(1, |v| v + 1);
        let path = self.path_for(version);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        if let Err(e) = write(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(TrainError::Model(e));
        }
        fs::rename(&tmp, &path)?;

        self.index.latest = Some(version);
        self.index.versions.push(version);
        let excess = self.index.versions.len().saturating_sub(self.max_to_keep);
        let evicted: Vec<u64> = self.index.versions.drain(..excess).collect();
        self.write_index()?;

        for old in evicted {
            match fs::remove_file(self.path_for(old)) {
                Ok(()) => debug!("Evicted checkpoint version {}", old),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove checkpoint version {}: {}", old, e),
            }
        }

        Ok(Checkpoint { version, path })
    }

    fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{version}.{EXTENSION}"))
    }

    fn write_index(&self) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Rebuilds the index from snapshot file names when `checkpoint.json` is missing.
fn scan(dir: &Path) -> Result<CheckpointIndex> {
    let mut versions: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            name.strip_prefix(PREFIX)?
                .strip_suffix(&format!(".{EXTENSION}"))?
                .parse()
                .ok()
        })
        .collect();
    versions.sort_unstable();

    Ok(CheckpointIndex {
        latest: versions.last().copied(),
        versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_bytes(tag: &'static str) -> impl FnOnce(&Path) -> anyhow::Result<()> {
        move |p: &Path| Ok(fs::write(p, tag)?)
    }

    #[test]
    fn test_empty_store_has_no_latest() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), 3).unwrap();
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_retains_only_the_newest() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), 3).unwrap();
        for _ in 0..5 {
            store.save(write_bytes("w")).unwrap();
        }

        assert_eq!(store.versions(), [3, 4, 5]);
        assert_eq!(store.latest().unwrap().version, 5);
        for v in 1..=5 {
            assert_eq!(dir.path().join(format!("ckpt-{v}.ckpt")).exists(), v >= 3);
        }
    }

    #[test]
    fn test_versions_keep_increasing_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = CheckpointStore::open(dir.path(), 10).unwrap();
            store.save(write_bytes("a")).unwrap();
            store.save(write_bytes("b")).unwrap();
        }
        let mut store = CheckpointStore::open(dir.path(), 10).unwrap();
        assert_eq!(store.latest().unwrap().version, 2);
        let next = store.save(write_bytes("c")).unwrap();
        assert_eq!(next.version, 3);
        assert_eq!(fs::read_to_string(next.path).unwrap(), "c");
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), 10).unwrap();
        store.save(write_bytes("ok")).unwrap();

        let err = store
            .save(|p| {
                fs::write(p, "partial")?;
                anyhow::bail!("disk full")
            })
            .unwrap_err();
        assert!(matches!(err, TrainError::Model(_)));
        assert_eq!(store.versions(), [1]);
        assert!(!dir.path().join("ckpt-2.ckpt").exists());
        assert!(!dir.path().join("ckpt-2.ckpt.tmp").exists());
    }

    #[test]
    fn test_index_is_rebuilt_from_files() {
        let dir = tempdir().unwrap();
        for v in [2, 7, 5] {
            fs::write(dir.path().join(format!("ckpt-{v}.ckpt")), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let store = CheckpointStore::open(dir.path(), 10).unwrap();
        assert_eq!(store.versions(), [2, 5, 7]);
        assert_eq!(store.latest().unwrap().version, 7);
    }
}
