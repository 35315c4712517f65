//! Storage backends and record encoding.
//!
//! `FileStorage` keeps one directory per namespace and one TOML file per key,
//! replaced atomically (write temp file, fsync, rename). `MemoryStorage` is an
//! in-process map with write-failure injection for tests.
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use doser_traits::Storage;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DoserError;
use crate::util::lock;

const RECORD_EXT: &str = "toml";
const TEMP_EXT: &str = "new";

/// Replace `path` with `bytes` so readers never observe a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(TEMP_EXT);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

fn check_name(kind: &str, name: &str) -> io::Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {kind} name {name:?}"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage root directory.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> io::Result<PathBuf> {
        check_name("namespace", namespace)?;
        Ok(self.root.join(namespace))
    }

    fn record_path(&self, namespace: &str, key: &str) -> io::Result<PathBuf> {
        check_name("key", key)?;
        Ok(self
            .namespace_dir(namespace)?
            .join(format!("{key}.{RECORD_EXT}")))
    }
}

impl Storage for FileStorage {
    fn get(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(namespace, key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> io::Result<()> {
        let path = self.record_path(namespace, key)?;
        fs::create_dir_all(self.namespace_dir(namespace)?)?;
        write_atomic(&path, value)
    }

    fn remove(&self, namespace: &str, key: &str) -> io::Result<bool> {
        match fs::remove_file(self.record_path(namespace, key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn keys(&self, namespace: &str) -> io::Result<Vec<String>> {
        let dir = self.namespace_dir(namespace)?;
        let entries = match fs::read_dir(&dir) {
            Ok(it) => it,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            // Leftover temp files from an interrupted write are not records.
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_owned());
            }
        }
        Ok(keys)
    }

    fn clear(&self, namespace: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.namespace_dir(namespace)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory storage. Writes can be made to fail to exercise persistence errors.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, `put`, `remove` and `clear` return an I/O error and change nothing.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Total number of records across namespaces.
    pub fn len(&self) -> usize {
        lock(&self.data).values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(io::Error::other("storage write rejected"))
        } else {
            Ok(())
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(lock(&self.data)
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        lock(&self.data)
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> io::Result<bool> {
        self.check_writable()?;
        Ok(lock(&self.data)
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key))
            .is_some())
    }

    fn keys(&self, namespace: &str) -> io::Result<Vec<String>> {
        Ok(lock(&self.data)
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, namespace: &str) -> io::Result<()> {
        self.check_writable()?;
        lock(&self.data).remove(namespace);
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize>(what: &str, value: &T) -> Result<Vec<u8>, DoserError> {
    toml::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| DoserError::persistence(what, e))
}

pub(crate) fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T, DoserError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DoserError::persistence(what, e))?;
    toml::from_str(text).map_err(|e| DoserError::persistence(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_roundtrip_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        assert_eq!(s.get("ns", "a").unwrap(), None);
        s.put("ns", "a", b"one").unwrap();
        s.put("ns", "a", b"two").unwrap();
        s.put("ns", "b", b"three").unwrap();
        assert_eq!(s.get("ns", "a").unwrap().as_deref(), Some(&b"two"[..]));
        let mut keys = s.keys("ns").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(s.remove("ns", "a").unwrap());
        assert!(!s.remove("ns", "a").unwrap());
        s.clear("ns").unwrap();
        assert!(s.keys("ns").unwrap().is_empty());
    }

    #[test]
    fn file_storage_ignores_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        s.put("ns", "a", b"x").unwrap();
        fs::write(dir.path().join("ns").join("b.new"), b"partial").unwrap();
        assert_eq!(s.keys("ns").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        let err = s.put("ns", "../escape", b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn memory_storage_write_failures_leave_data_untouched() {
        let s = MemoryStorage::new();
        s.put("ns", "k", b"v1").unwrap();
        s.set_fail_writes(true);
        assert!(s.put("ns", "k", b"v2").is_err());
        assert!(s.remove("ns", "k").is_err());
        assert_eq!(s.get("ns", "k").unwrap().as_deref(), Some(&b"v1"[..]));
        s.set_fail_writes(false);
        assert!(s.remove("ns", "k").unwrap());
        assert!(s.is_empty());
    }
}
