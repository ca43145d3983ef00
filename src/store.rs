//! One-file-per-id JSON storage.
//!
//! A [`FolderStore`] maps integer ids to JSON values, one pretty-printed file
//! per id named by the decimal id. Reads go through an in-memory cache; writes
//! replace the whole file. A [`MetaFolderStore`] adds a sidecar file next to the
//! folder holding the sync watermark.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::decode::{DecodeError, Decoder};
use crate::schema::Record;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("{} is not valid json: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("stored value {id} in {folder} no longer decodes: {source}")]
    Decode {
        folder: String,
        id: i64,
        source: DecodeError,
    },

    #[error("could not serialize value {id}: {source}")]
    Serialize { id: i64, source: serde_json::Error },

    #[error("{folder} has no entry {id}, sync first")]
    Missing { folder: String, id: i64 },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error only says a stored value is unreadable with the
    /// current schema or json parser, as opposed to the disk failing.
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::Decode { .. } | StoreError::Json { .. })
    }
}

/// Writes `value` as two-space indented json, replacing `path` as a whole.
///
/// The content goes to a dot-prefixed sibling first and is renamed over the
/// target, so an interrupted write never leaves a truncated file behind.
pub(crate) fn write_json_atomic(path: &Path, value: &Value) -> Result<(), StoreError> {
    let mut content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    content.push('\n');

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, content).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// The id stored under `name`, if `name` is its canonical decimal form.
fn parse_id(name: &str) -> Option<i64> {
    name.parse::<i64>().ok().filter(|id| id.to_string() == name)
}

pub(crate) fn read_json(path: &Path) -> Result<Option<Value>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Persistent map from id to json value backed by a directory.
#[derive(Debug)]
pub struct FolderStore {
    dir: PathBuf,
    cache: HashMap<i64, Value>,
}

impl FolderStore {
    /// Opens the store at `dir`. The directory is created on the first write.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dir.display().to_string())
    }

    fn path_of(&self, id: i64) -> PathBuf {
        self.dir.join(id.to_string())
    }

    /// The value stored for `id`, or `None` if it was never written.
    pub fn get(&mut self, id: i64) -> Result<Option<&Value>, StoreError> {
        if !self.cache.contains_key(&id) {
            match read_json(&self.path_of(id))? {
                Some(value) => {
                    self.cache.insert(id, value);
                }
                None => {
                    debug!(store = %self.name(), id, "cache miss");
                    return Ok(None);
                }
            }
        }
        Ok(self.cache.get(&id))
    }

    /// Like [`FolderStore::get`], but a missing id is an error.
    pub fn require(&mut self, id: i64) -> Result<&Value, StoreError> {
        let folder = self.name();
        self.get(id)?.ok_or(StoreError::Missing { folder, id })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.cache.contains_key(&id) || self.path_of(id).is_file()
    }

    /// Replaces the value stored for `id`.
    pub fn set(&mut self, id: i64, value: Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        write_json_atomic(&self.path_of(id), &value)?;
        self.cache.insert(id, value);
        Ok(())
    }

    pub fn set_record<T: Serialize>(&mut self, id: i64, record: &T) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(record).map_err(|source| StoreError::Serialize { id, source })?;
        self.set(id, value)
    }

    /// Ids with a file in the store directory, ascending. A missing directory
    /// is an empty store; names that [`FolderStore::set`] would not have
    /// written, such as `007` or `+5`, are ignored.
    pub fn ids(&self) -> Result<Vec<i64>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            match name.to_str().and_then(parse_id) {
                Some(id) => ids.push(id),
                None => debug!(store = %self.name(), file = ?name, "skipping foreign file"),
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.ids().map(|ids| ids.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    /// Decodes the single record stored for `id`.
    pub fn get_record<T: Record>(
        &mut self,
        decoder: &Decoder,
        id: i64,
    ) -> Result<Option<T>, StoreError> {
        let folder = self.name();
        match self.get(id)? {
            None => Ok(None),
            Some(value) => decoder
                .decode_one(value)
                .map(Some)
                .map_err(|source| StoreError::Decode { folder, id, source }),
        }
    }

    /// Decodes the list of records stored for `id`.
    pub fn get_records<T: Record>(
        &mut self,
        decoder: &Decoder,
        id: i64,
    ) -> Result<Option<Vec<T>>, StoreError> {
        let folder = self.name();
        match self.get(id)? {
            None => Ok(None),
            Some(value) => decoder
                .decode_many(Some(value))
                .map(Some)
                .map_err(|source| StoreError::Decode { folder, id, source }),
        }
    }
}

/// Scalar attributes kept in a store's sidecar file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Unix time up to which server changes have been merged.
    #[serde(default)]
    pub last_sync: i64,
    /// Attributes this version does not know, kept on rewrite.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A [`FolderStore`] with a `<folder>_meta` sidecar next to its directory.
#[derive(Debug)]
pub struct MetaFolderStore {
    folder: FolderStore,
    meta_path: PathBuf,
    meta: SyncMeta,
}

impl MetaFolderStore {
    /// Opens the store `root/name` and eagerly reads `root/name_meta`. An
    /// absent sidecar yields the default meta (`last_sync = 0`).
    pub fn open(root: &Path, name: &str) -> Result<Self, StoreError> {
        let meta_path = root.join(format!("{name}_meta"));
        let meta = match read_json(&meta_path)? {
            Some(value) => {
                serde_json::from_value(value).map_err(|source| StoreError::Json {
                    path: meta_path.clone(),
                    source,
                })?
            }
            None => SyncMeta::default(),
        };
        Ok(Self {
            folder: FolderStore::open(root.join(name)),
            meta_path,
            meta,
        })
    }

    pub fn folder(&self) -> &FolderStore {
        &self.folder
    }

    pub fn folder_mut(&mut self) -> &mut FolderStore {
        &mut self.folder
    }

    pub fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    pub fn last_sync(&self) -> i64 {
        self.meta.last_sync
    }

    /// Advances the watermark and rewrites the sidecar.
    pub fn set_last_sync(&mut self, timestamp: i64) -> Result<(), StoreError> {
        self.meta.last_sync = timestamp;
        let value = serde_json::to_value(&self.meta).map_err(|source| StoreError::Json {
            path: self.meta_path.clone(),
            source,
        })?;
        if let Some(parent) = self.meta_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        write_json_atomic(&self.meta_path, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FolderStore::open(tmp.path().join("assignments"));
        assert_eq!(store.get(1).unwrap(), None);
        assert!(!store.contains(1));
        assert!(store.ids().unwrap().is_empty());
        assert!(matches!(store.require(1), Err(StoreError::Missing { id: 1, .. })));
    }

    #[test]
    fn test_set_writes_sorted_pretty_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("assignments");
        let mut store = FolderStore::open(&dir);
        store.set(42, json!({"name": "HW1", "id": 42})).unwrap();

        let content = fs::read_to_string(dir.join("42")).unwrap();
        assert_eq!(content, "{\n  \"id\": 42,\n  \"name\": \"HW1\"\n}\n");
        assert!(!dir.join(".42.tmp").exists());

        let mut reopened = FolderStore::open(&dir);
        assert_eq!(reopened.get(42).unwrap(), Some(&json!({"id": 42, "name": "HW1"})));
    }

    #[test]
    fn test_ids_skip_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("grades");
        let mut store = FolderStore::open(&dir);
        store.set(10, json!([])).unwrap();
        store.set(2, json!([])).unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        for name in ["007", "+5", "-0"] {
            fs::write(dir.join(name), "[]").unwrap();
        }
        assert_eq!(store.ids().unwrap(), vec![2, 10]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_corrupt_file_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("users");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("3"), "{not json").unwrap();
        let mut store = FolderStore::open(&dir);
        let err = store.get(3).unwrap_err();
        assert!(err.is_stale());
    }

    #[test]
    fn test_sidecar_absent_then_written() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = MetaFolderStore::open(tmp.path(), "submissions").unwrap();
        assert_eq!(store.last_sync(), 0);

        store.set_last_sync(1_700_000_000).unwrap();
        let content = fs::read_to_string(tmp.path().join("submissions_meta")).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&content).unwrap(),
            json!({"last_sync": 1_700_000_000})
        );

        let reopened = MetaFolderStore::open(tmp.path(), "submissions").unwrap();
        assert_eq!(reopened.last_sync(), 1_700_000_000);
    }

    #[test]
    fn test_sidecar_keeps_unknown_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("grades_meta"),
            r#"{"last_sync": 5, "schema": "v1"}"#,
        )
        .unwrap();
        let mut store = MetaFolderStore::open(tmp.path(), "grades").unwrap();
        assert_eq!(store.last_sync(), 5);
        store.set_last_sync(9).unwrap();

        let reopened = MetaFolderStore::open(tmp.path(), "grades").unwrap();
        assert_eq!(reopened.last_sync(), 9);
        assert_eq!(reopened.meta().extra.get("schema"), Some(&json!("v1")));
    }
}
