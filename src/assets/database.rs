//! GUID index over the asset directory
//!
//! Every asset file `foo.ext` has a sidecar `foo.ext.meta` holding its GUID.
//! The index is rebuilt from a directory scan; missing sidecars are created.

use super::project::normalize;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

pub const META_EXTENSION: &str = "meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct MetaFile {
    guid: Uuid,
}

/// A type the database can load from a file
pub trait Asset: Sized {
    fn load(path: &Path) -> EngineResult<Self>;
}

/// GUID ↔ path maps for one asset root
#[derive(Debug, Default)]
pub struct AssetDatabase {
    root: PathBuf,
    guid_to_path: HashMap<Uuid, PathBuf>,
    path_to_guid: HashMap<PathBuf, Uuid>,
}

fn meta_path(asset: &Path) -> PathBuf {
    let mut name = asset.as_os_str().to_os_string();
    name.push(".");
    name.push(META_EXTENSION);
    PathBuf::from(name)
}

fn is_meta(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(META_EXTENSION)
}

impl AssetDatabase {
    /// Empty index, nothing scanned
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
            ..Default::default()
        }
    }

    /// Scan `root` and build the index
    pub fn scan(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let mut db = Self::new(root);
        db.refresh()?;
        Ok(db)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild both maps from disk
    pub fn refresh(&mut self) -> EngineResult<()> {
        self.guid_to_path.clear();
        self.path_to_guid.clear();
        if !self.root.is_dir() {
            log::warn!("Asset root {} does not exist", self.root.display());
            return Ok(());
        }

        let files: Vec<PathBuf> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable asset entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && !is_meta(e.path()))
            .map(|e| e.into_path())
            .collect();

        for file in files {
            self.register(&file)?;
        }
        log::info!(
            "Indexed {} assets under {}",
            self.guid_to_path.len(),
            self.root.display()
        );
        Ok(())
    }

    /// Add one file to the index, creating its sidecar when needed
    pub fn register(&mut self, path: &Path) -> EngineResult<Uuid> {
        let path = normalize(path);
        let guid = match read_meta(&path) {
            Some(guid) if !self.guid_to_path.contains_key(&guid) => guid,
            Some(guid) => {
                log::warn!(
                    "{} reuses GUID {} of {}; assigning a new one",
                    path.display(),
                    guid,
                    self.guid_to_path[&guid].display()
                );
                write_meta(&path, Uuid::new_v4())?
            }
            None => write_meta(&path, Uuid::new_v4())?,
        };
        self.guid_to_path.insert(guid, path.clone());
        self.path_to_guid.insert(path, guid);
        Ok(guid)
    }

    pub fn len(&self) -> usize {
        self.guid_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guid_to_path.is_empty()
    }

    pub fn path_for_guid(&self, guid: Uuid) -> Option<&Path> {
        self.guid_to_path.get(&guid).map(PathBuf::as_path)
    }

    pub fn guid_for_path(&self, path: &Path) -> Option<Uuid> {
        self.path_to_guid.get(&normalize(path)).copied()
    }

    /// Load the asset behind `guid`. Unknown GUIDs and load failures are logged.
    pub fn try_load<T: Asset>(&self, guid: Uuid) -> Option<T> {
        let Some(path) = self.path_for_guid(guid) else {
            log::warn!("No asset with GUID {}", guid);
            return None;
        };
        match T::load(path) {
            Ok(asset) => Some(asset),
            Err(e) => {
                log::warn!("Failed to load {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Like [`try_load`](Self::try_load), but reports why loading failed
    pub fn load<T: Asset>(&self, guid: Uuid) -> EngineResult<T> {
        let path = self
            .path_for_guid(guid)
            .ok_or_else(|| EngineError::AssetNotFound(guid.to_string()))?;
        T::load(path)
    }
}

fn read_meta(asset: &Path) -> Option<Uuid> {
    let meta = meta_path(asset);
    let text = std::fs::read_to_string(&meta).ok()?;
    match serde_json::from_str::<MetaFile>(&text) {
        Ok(m) => Some(m.guid),
        Err(e) => {
            log::warn!("Corrupt meta file {}: {}", meta.display(), e);
            None
        }
    }
}

fn write_meta(asset: &Path, guid: Uuid) -> EngineResult<Uuid> {
    let meta = meta_path(asset);
    std::fs::write(&meta, serde_json::to_string_pretty(&MetaFile { guid })?)?;
    log::debug!("Wrote {}", meta.display());
    Ok(guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Text(String);

    impl Asset for Text {
        fn load(path: &Path) -> EngineResult<Self> {
            Ok(Text(std::fs::read_to_string(path)?))
        }
    }

    #[test]
    fn scan_creates_stable_guids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "beta").unwrap();

        let db = AssetDatabase::scan(dir.path()).unwrap();
        assert_eq!(db.len(), 2);
        assert!(dir.path().join("a.txt.meta").exists());

        let guid = db.guid_for_path(&dir.path().join("sub/b.txt")).unwrap();
        let again = AssetDatabase::scan(dir.path()).unwrap();
        assert_eq!(again.guid_for_path(&dir.path().join("sub/b.txt")), Some(guid));
        assert_eq!(again.try_load::<Text>(guid).unwrap().0, "beta");
    }

    #[test]
    fn unknown_guid_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = AssetDatabase::scan(dir.path()).unwrap();
        assert!(db.try_load::<Text>(Uuid::new_v4()).is_none());
        assert!(matches!(
            db.load::<Text>(Uuid::new_v4()),
            Err(EngineError::AssetNotFound(_))
        ));
    }
}
