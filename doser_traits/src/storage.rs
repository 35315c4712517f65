//! Namespaced blob key-value persistence.
//!
//! Mirrors a small non-volatile preferences store: each namespace holds a flat
//! set of keys, each key one opaque record. Implementations must make `put`
//! atomic per key (a reader sees either the old or the new value).

use std::io;

pub trait Storage: Send + Sync {
    /// Read a value. `Ok(None)` when the key does not exist.
    fn get(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> io::Result<()>;
    /// Remove a key. Returns whether it existed.
    fn remove(&self, namespace: &str, key: &str) -> io::Result<bool>;
    /// All keys in a namespace, in no particular order.
    fn keys(&self, namespace: &str) -> io::Result<Vec<String>>;
    /// Remove every key in a namespace.
    fn clear(&self, namespace: &str) -> io::Result<()>;

    fn contains(&self, namespace: &str, key: &str) -> io::Result<bool> {
        Ok(self.get(namespace, key)?.is_some())
    }
}

impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    fn get(&self, namespace: &str, key: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).get(namespace, key)
    }
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> io::Result<()> {
        (**self).put(namespace, key, value)
    }
    fn remove(&self, namespace: &str, key: &str) -> io::Result<bool> {
        (**self).remove(namespace, key)
    }
    fn keys(&self, namespace: &str) -> io::Result<Vec<String>> {
        (**self).keys(namespace)
    }
    fn clear(&self, namespace: &str) -> io::Result<()> {
        (**self).clear(namespace)
    }
}
