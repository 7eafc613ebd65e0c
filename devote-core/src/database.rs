//! Key-value database and namespaced tables
//!
//! All six consensus tables share one physical [`Database`]. Each table sees
//! it through a [`Table`], which prepends a private namespace to every key so
//! that tables never collide.

use crate::{Result, TrieError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Backing store for committed map state
///
/// Implementations must be safe to share between a writer and any number of
/// readers opened at historical roots.
pub trait Database: Send + Sync + fmt::Debug {
    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Check whether a key is present
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// In-memory database, optionally persisted to a single file
///
/// The file is a sequence of bincode `(key, value)` records. Later records
/// win, so new writes can be appended with [`MemoryDatabase::append_to_file`]
/// instead of rewriting the whole file.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: RwLock<DatabaseState>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Keys written since the file was last brought up to date
    unsaved: BTreeSet<Vec<u8>>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty database behind an `Arc`, ready to hand to tables
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored keys
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    /// Whether no key is stored
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.entries.is_empty())
    }

    /// Number of keys not yet written to the database file
    pub fn unsaved_len(&self) -> Result<usize> {
        Ok(self.read()?.unsaved.len())
    }

    /// Load a database written by [`MemoryDatabase::save_to_file`] and
    /// [`MemoryDatabase::append_to_file`]
    ///
    /// A record cut short at the end of the file, left by a crash during an
    /// append, is dropped and the file is truncated back to the last whole
    /// record.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut entries = BTreeMap::new();
        let mut records = 0usize;

        loop {
            let offset = reader.stream_position()?;
            if reader.fill_buf()?.is_empty() {
                break;
            }
            match bincode::deserialize_from::<_, (Vec<u8>, Vec<u8>)>(&mut reader) {
                Ok((key, value)) => {
                    entries.insert(key, value);
                    records += 1;
                }
                Err(err) if is_truncated(&err) => {
                    warn!(
                        "Dropping truncated record at byte {} of {}",
                        offset,
                        path.display()
                    );
                    OpenOptions::new().write(true).open(path)?.set_len(offset)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(
            "Loaded {} database entries ({} records) from {}",
            entries.len(),
            records,
            path.display()
        );
        Ok(Self {
            state: RwLock::new(DatabaseState {
                entries,
                unsaved: BTreeSet::new(),
            }),
        })
    }

    /// Write every entry to `path`, replacing the file
    ///
    /// The entries go to a temporary file next to `path` which is then
    /// renamed over it, so a crash leaves either the old or the new file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut state = self.write()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = temporary_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in &state.entries {
                bincode::serialize_into(&mut writer, &record)?;
            }
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;

        state.unsaved.clear();
        debug!("Saved {} database entries to {}", state.entries.len(), path.display());
        Ok(())
    }

    /// Append the entries written since the last save or append
    ///
    /// Falls back to [`MemoryDatabase::save_to_file`] when `path` does not
    /// exist yet. Returns the number of records appended.
    pub fn append_to_file(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            let count = self.len()?;
            self.save_to_file(path)?;
            return Ok(count);
        }

        let mut state = self.write()?;
        let mut writer = BufWriter::new(OpenOptions::new().append(true).open(path)?);
        for key in &state.unsaved {
            if let Some(value) = state.entries.get(key) {
                bincode::serialize_into(&mut writer, &(key, value))?;
            }
        }
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        let count = state.unsaved.len();
        state.unsaved.clear();
        debug!("Appended {} database entries to {}", count, path.display());
        Ok(count)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DatabaseState>> {
        self.state
            .read()
            .map_err(|_| TrieError::Storage("database lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DatabaseState>> {
        self.state
            .write()
            .map_err(|_| TrieError::Storage("database lock poisoned".to_string()))
    }
}

impl Database for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.write()?;
        if state.entries.get(key).map(Vec::as_slice) == Some(value) {
            return Ok(());
        }
        state.entries.insert(key.to_vec(), value.to_vec());
        state.unsaved.insert(key.to_vec());
        Ok(())
    }
}

fn is_truncated(err: &bincode::Error) -> bool {
    matches!(&**err, bincode::ErrorKind::Io(io) if io.kind() == ErrorKind::UnexpectedEof)
}

/// Sibling of `path` used while it is being replaced
pub fn temporary_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace the file at `path` with `contents` without ever leaving it
/// half-written
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = temporary_path(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// A namespaced view of a shared database
#[derive(Clone)]
pub struct Table {
    db: Arc<dyn Database>,
    namespace: Vec<u8>,
}

impl Table {
    /// Scope `db` to keys starting with `namespace`
    pub fn new(db: Arc<dyn Database>, namespace: impl AsRef<[u8]>) -> Self {
        Self {
            db,
            namespace: namespace.as_ref().to_vec(),
        }
    }

    /// Prefix prepended to every key of this table
    pub fn namespace(&self) -> &[u8] {
        &self.namespace
    }

    /// The shared database behind this table
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Read a key of this table
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get(&self.scoped(key))
    }

    /// Write a key of this table
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(&self.scoped(key), value)
    }

    /// Check whether a key of this table is present
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.db.contains(&self.scoped(key))
    }

    fn scoped(&self, key: &[u8]) -> Vec<u8> {
        let mut scoped = Vec::with_capacity(self.namespace.len() + key.len());
        scoped.extend_from_slice(&self.namespace);
        scoped.extend_from_slice(key);
        scoped
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("namespace", &String::from_utf8_lossy(&self.namespace))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_do_not_collide() {
        let db: Arc<dyn Database> = MemoryDatabase::shared();
        let votes = Table::new(db.clone(), "vote-");
        let cache = Table::new(db.clone(), "cache-");

        votes.put(b"key", b"vote").unwrap();
        cache.put(b"key", b"cache").unwrap();

        assert_eq!(votes.get(b"key").unwrap(), Some(b"vote".to_vec()));
        assert_eq!(cache.get(b"key").unwrap(), Some(b"cache".to_vec()));
        assert_eq!(db.get(b"vote-key").unwrap(), Some(b"vote".to_vec()));
        assert!(db.get(b"key").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("devote.db");

        let db = MemoryDatabase::new();
        db.put(b"alpha", b"1").unwrap();
        db.put(b"beta", b"2").unwrap();
        db.save_to_file(&path).unwrap();

        let loaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(loaded.len().unwrap(), 2);
        assert_eq!(loaded.get(b"beta").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MemoryDatabase::load_from_file(&dir.path().join("absent.db"));
        assert!(matches!(result, Err(TrieError::Io(_))));
    }

    #[test]
    fn test_append_writes_only_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devote.db");

        let db = MemoryDatabase::new();
        for i in 0u32..100 {
            db.put(&i.to_be_bytes(), &[0xab; 64]).unwrap();
        }
        db.save_to_file(&path).unwrap();
        let saved = std::fs::metadata(&path).unwrap().len();

        db.put(b"late", b"value").unwrap();
        db.put(&7u32.to_be_bytes(), &[0xab; 64]).unwrap();
        assert_eq!(db.unsaved_len().unwrap(), 1);
        assert_eq!(db.append_to_file(&path).unwrap(), 1);

        let grown = std::fs::metadata(&path).unwrap().len() - saved;
        assert!(grown < 64, "appended {grown} bytes for one small entry");
        assert_eq!(db.unsaved_len().unwrap(), 0);

        let loaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(loaded.len().unwrap(), 101);
        assert_eq!(loaded.get(b"late").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_later_records_override_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devote.db");

        let db = MemoryDatabase::new();
        db.put(b"key", b"old").unwrap();
        db.append_to_file(&path).unwrap();
        db.put(b"key", b"new").unwrap();
        db.append_to_file(&path).unwrap();

        let loaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(loaded.get(b"key").unwrap(), Some(b"new".to_vec()));
        assert_eq!(loaded.len().unwrap(), 1);
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devote.db");

        let db = MemoryDatabase::new();
        db.put(b"kept", b"1").unwrap();
        db.save_to_file(&path).unwrap();
        let good_len = std::fs::metadata(&path).unwrap().len();

        db.put(b"torn", &[7u8; 32]).unwrap();
        db.append_to_file(&path).unwrap();
        let full_len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full_len - 5)
            .unwrap();

        let loaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(loaded.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert!(loaded.get(b"torn").unwrap().is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        loaded.put(b"after", b"2").unwrap();
        loaded.append_to_file(&path).unwrap();
        let reloaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(reloaded.get(b"after").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reloaded.len().unwrap(), 2);
    }

    #[test]
    fn test_save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devote.db");
        std::fs::write(&path, b"stale contents").unwrap();

        let db = MemoryDatabase::new();
        db.put(b"key", b"value").unwrap();
        db.save_to_file(&path).unwrap();

        assert!(!temporary_path(&path).exists());
        let loaded = MemoryDatabase::load_from_file(&path).unwrap();
        assert_eq!(loaded.len().unwrap(), 1);
    }

    #[test]
    fn test_write_file_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.json");
        write_file_atomic(&path, b"first").unwrap();
        write_file_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!temporary_path(&path).exists());
    }
}
