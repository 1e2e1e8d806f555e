//! Persistent index store for RivetDB
//!
//! One ordered index per (table, column) pair lives in its own checksummed
//! file inside the data directory. The primary-key index of a table holds
//! the rows themselves; every secondary index maps a column value to the set
//! of primary keys carrying it. The directory is guarded by an advisory
//! lock so two engine instances cannot open the same data at once.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use super::tree::{OrderedTree, Range};
use super::value::{Row, Value};
use crate::catalog::DataType;
use crate::error::{Error, Result};

/// Name of the advisory lock file inside a data directory
const LOCK_FILE: &str = "LOCK";

/// The set of primary keys stored under one secondary-index key
pub type PkSet = BTreeSet<Value>;

/// A file-based advisory lock on the data directory
///
/// Released automatically when dropped (the underlying descriptor closes).
#[derive(Debug)]
struct DirLock {
    _file: File,
}

impl DirLock {
    /// Try to acquire the directory lock without blocking.
    fn try_exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive().map_err(|_| {
            Error::DataDirLocked(path.parent().unwrap_or(path).display().to_string())
        })?;

        Ok(Self { _file: file })
    }
}

/// On-disk representation of one index file
#[derive(Deserialize)]
struct IndexFileBody<V> {
    key_type: DataType,
    tree: OrderedTree<V>,
}

/// Borrowed view of [`IndexFileBody`] for writing
#[derive(Serialize)]
struct IndexFileBodyRef<'a, V> {
    key_type: DataType,
    tree: &'a OrderedTree<V>,
}

/// A single persistent ordered index with typed keys
///
/// Every mutating operation is written through to the backing file before it
/// returns.
#[derive(Debug)]
pub struct OrderedIndex<V> {
    name: String,
    path: PathBuf,
    key_type: DataType,
    tree: OrderedTree<V>,
}

impl<V> OrderedIndex<V>
where
    V: Serialize + DeserializeOwned + Clone + Debug,
{
    /// Create a new empty index file; fails if the file already exists.
    fn create(dir: &Path, table: &str, column: &str, key_type: DataType) -> Result<Self> {
        let path = index_file_path(dir, table, column);
        if path.exists() {
            return Err(Error::DdlFailed(format!(
                "index file '{}' already exists",
                path.display()
            )));
        }
        let index = Self {
            name: format!("{}__{}", table, column),
            path,
            key_type,
            tree: OrderedTree::new(),
        };
        index.flush()?;
        Ok(index)
    }

    /// Open an existing index file, verifying its checksum and key type.
    fn open(dir: &Path, table: &str, column: &str, key_type: DataType) -> Result<Self> {
        let path = index_file_path(dir, table, column);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::StorageCorrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let (checksum_line, body_json) =
            content.split_once('\n').ok_or_else(|| Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: "missing checksum header".to_string(),
            })?;
        let stored = u64::from_str_radix(checksum_line.trim(), 16).map_err(|_| {
            Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: "malformed checksum header".to_string(),
            }
        })?;
        if stored != xxh64(body_json.as_bytes(), 0) {
            return Err(Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        let body: IndexFileBody<V> =
            serde_json::from_str(body_json).map_err(|e| Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if body.key_type != key_type {
            return Err(Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: format!(
                    "declared key type {} does not match stored {}",
                    key_type, body.key_type
                ),
            });
        }

        debug!(index = %format!("{}__{}", table, column), entries = body.tree.len(), "opened index");
        Ok(Self {
            name: format!("{}__{}", table, column),
            path,
            key_type,
            tree: body.tree,
        })
    }

    /// Write the full tree back to the backing file.
    pub fn flush(&self) -> Result<()> {
        let body = serde_json::to_string(&IndexFileBodyRef {
            key_type: self.key_type,
            tree: &self.tree,
        })
        .map_err(|e| Error::Internal(e.to_string()))?;
        let content = format!("{:016x}\n{}", xxh64(body.as_bytes(), 0), body);
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// The key type declared for this index
    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn check_key(&self, key: &Value) -> Result<()> {
        if key.data_type() != self.key_type {
            return Err(Error::KeyTypeMismatch {
                index: self.name.clone(),
                expected: self.key_type.to_string(),
                found: key.data_type().to_string(),
            });
        }
        Ok(())
    }

    fn check_bound(&self, bound: &Bound<Value>) -> Result<()> {
        match bound {
            Bound::Included(v) | Bound::Excluded(v) => self.check_key(v),
            Bound::Unbounded => Ok(()),
        }
    }

    /// Point lookup
    pub fn get(&self, key: &Value) -> Result<Option<&V>> {
        self.check_key(key)?;
        Ok(self.tree.get(key))
    }

    /// Insert or replace the payload for a key, durably.
    pub fn put(&mut self, key: Value, value: V) -> Result<Option<V>> {
        self.check_key(&key)?;
        let old = self.tree.put(key, value);
        self.flush()?;
        Ok(old)
    }

    /// Remove a key, durably. Returns the removed payload.
    pub fn delete(&mut self, key: &Value) -> Result<Option<V>> {
        self.check_key(key)?;
        let old = self.tree.remove(key);
        if old.is_some() {
            self.flush()?;
        }
        Ok(old)
    }

    /// Stage many entries and flush once; used for index backfill.
    pub fn extend<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (Value, V)>,
    {
        for (key, value) in entries {
            self.check_key(&key)?;
            self.tree.put(key, value);
        }
        self.flush()
    }

    /// Lazy ascending scan over the given key range; restartable by reissuing.
    pub fn range(&self, lower: Bound<Value>, upper: Bound<Value>) -> Result<Range<'_, V>> {
        self.check_bound(&lower)?;
        self.check_bound(&upper)?;
        Ok(self.tree.range(lower, upper))
    }

    /// Lazy ascending scan over every entry
    pub fn full_scan(&self) -> Range<'_, V> {
        self.tree.iter()
    }
}

impl OrderedIndex<PkSet> {
    /// Add one primary key under a secondary-index key. The stored set is
    /// replaced atomically.
    pub fn add_entry(&mut self, key: Value, pk: Value) -> Result<()> {
        self.check_key(&key)?;
        let mut set = self.tree.get(&key).cloned().unwrap_or_default();
        set.insert(pk);
        self.tree.put(key, set);
        self.flush()
    }

    /// Remove one primary key from a secondary-index key, dropping the key
    /// entirely once its set is empty.
    pub fn remove_entry(&mut self, key: &Value, pk: &Value) -> Result<()> {
        self.check_key(key)?;
        let Some(mut set) = self.tree.get(key).cloned() else {
            return Ok(());
        };
        set.remove(pk);
        if set.is_empty() {
            self.tree.remove(key);
        } else {
            self.tree.put(key.clone(), set);
        }
        self.flush()
    }

    /// The primary keys stored under a key, in ascending order
    pub fn pks_for(&self, key: &Value) -> Result<Vec<Value>> {
        Ok(self
            .get(key)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

fn index_file_path(dir: &Path, table: &str, column: &str) -> PathBuf {
    dir.join(format!("{}__{}.idx", table, column))
}

/// Owner of every open index and the data-directory lock
#[derive(Debug)]
pub struct IndexStore {
    dir: PathBuf,
    _lock: DirLock,
    primaries: HashMap<String, OrderedIndex<Row>>,
    secondaries: HashMap<(String, String), OrderedIndex<PkSet>>,
}

impl IndexStore {
    /// Open (creating if necessary) a data directory and take its lock.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock = DirLock::try_exclusive(&dir.join(LOCK_FILE))?;
        Ok(Self {
            dir,
            _lock: lock,
            primaries: HashMap::new(),
            secondaries: HashMap::new(),
        })
    }

    /// The data directory this store owns
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ========== Primary (row-store) indexes ==========

    pub fn create_primary(&mut self, table: &str, pk_column: &str, key_type: DataType) -> Result<()> {
        let index = OrderedIndex::create(&self.dir, table, pk_column, key_type)?;
        self.primaries.insert(table.to_string(), index);
        Ok(())
    }

    pub fn open_primary(&mut self, table: &str, pk_column: &str, key_type: DataType) -> Result<()> {
        let index = OrderedIndex::open(&self.dir, table, pk_column, key_type)?;
        self.primaries.insert(table.to_string(), index);
        Ok(())
    }

    pub fn drop_primary(&mut self, table: &str, pk_column: &str) -> Result<()> {
        self.primaries.remove(table);
        let path = index_file_path(&self.dir, table, pk_column);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn primary(&self, table: &str) -> Result<&OrderedIndex<Row>> {
        self.primaries
            .get(table)
            .ok_or_else(|| Error::Internal(format!("primary index for '{}' is not open", table)))
    }

    pub fn primary_mut(&mut self, table: &str) -> Result<&mut OrderedIndex<Row>> {
        self.primaries
            .get_mut(table)
            .ok_or_else(|| Error::Internal(format!("primary index for '{}' is not open", table)))
    }

    // ========== Secondary (multi-map) indexes ==========

    pub fn create_secondary(&mut self, table: &str, column: &str, key_type: DataType) -> Result<()> {
        let index = OrderedIndex::create(&self.dir, table, column, key_type)?;
        self.secondaries
            .insert((table.to_string(), column.to_string()), index);
        Ok(())
    }

    pub fn open_secondary(&mut self, table: &str, column: &str, key_type: DataType) -> Result<()> {
        let index = OrderedIndex::open(&self.dir, table, column, key_type)?;
        self.secondaries
            .insert((table.to_string(), column.to_string()), index);
        Ok(())
    }

    pub fn drop_secondary(&mut self, table: &str, column: &str) -> Result<()> {
        self.secondaries
            .remove(&(table.to_string(), column.to_string()));
        let path = index_file_path(&self.dir, table, column);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn secondary(&self, table: &str, column: &str) -> Option<&OrderedIndex<PkSet>> {
        self.secondaries
            .get(&(table.to_string(), column.to_string()))
    }

    pub fn secondary_mut(&mut self, table: &str, column: &str) -> Option<&mut OrderedIndex<PkSet>> {
        self.secondaries
            .get_mut(&(table.to_string(), column.to_string()))
    }

    pub fn has_secondary(&self, table: &str, column: &str) -> bool {
        self.secondaries
            .contains_key(&(table.to_string(), column.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_rejects_second_store() {
        let dir = tempdir().unwrap();
        let _store = IndexStore::open(dir.path()).unwrap();

        let second = IndexStore::open(dir.path());
        assert!(matches!(second, Err(Error::DataDirLocked(_))));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _store = IndexStore::open(dir.path()).unwrap();
        }
        assert!(IndexStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_primary_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path()).unwrap();
        store.create_primary("users", "id", DataType::Int).unwrap();

        let row = Row::new(vec![Value::Int(1), Value::Str("ada".into())]);
        store
            .primary_mut("users")
            .unwrap()
            .put(Value::Int(1), row.clone())
            .unwrap();

        drop(store);

        let mut store = IndexStore::open(dir.path()).unwrap();
        store.open_primary("users", "id", DataType::Int).unwrap();
        let loaded = store.primary("users").unwrap();
        assert_eq!(loaded.get(&Value::Int(1)).unwrap(), Some(&row));
    }

    #[test]
    fn test_key_type_mismatch() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path()).unwrap();
        store.create_primary("users", "id", DataType::Int).unwrap();

        let err = store
            .primary_mut("users")
            .unwrap()
            .put(Value::Str("oops".into()), Row::new(vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::KeyTypeMismatch { .. }));
    }

    #[test]
    fn test_corrupt_file_detected() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path()).unwrap();
        store.create_primary("users", "id", DataType::Int).unwrap();
        drop(store);

        let path = dir.path().join("users__id.idx");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("garbage");
        std::fs::write(&path, content).unwrap();

        let mut store = IndexStore::open(dir.path()).unwrap();
        let err = store.open_primary("users", "id", DataType::Int).unwrap_err();
        assert!(matches!(err, Error::StorageCorrupt { .. }));
    }

    #[test]
    fn test_secondary_multimap() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path()).unwrap();
        store
            .create_secondary("users", "age", DataType::Int)
            .unwrap();

        let idx = store.secondary_mut("users", "age").unwrap();
        idx.add_entry(Value::Int(30), Value::Int(2)).unwrap();
        idx.add_entry(Value::Int(30), Value::Int(1)).unwrap();
        idx.add_entry(Value::Int(25), Value::Int(3)).unwrap();

        assert_eq!(
            idx.pks_for(&Value::Int(30)).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );

        idx.remove_entry(&Value::Int(30), &Value::Int(1)).unwrap();
        assert_eq!(idx.pks_for(&Value::Int(30)).unwrap(), vec![Value::Int(2)]);

        idx.remove_entry(&Value::Int(30), &Value::Int(2)).unwrap();
        assert!(idx.get(&Value::Int(30)).unwrap().is_none());
    }
}
