use super::{Lookup, RecordStore, StoreError, a_key, cname_key};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-process record store.
///
/// Backs the test suite and benchmarks. It can be switched into an
/// unavailable state in which every lookup fails as a transient error.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn insert_a(&self, name: &str, addr: impl Into<String>) {
        self.insert(a_key(name), addr);
    }

    pub fn insert_cname(&self, name: &str, target: impl Into<String>) {
        self.insert(cname_key(name), target);
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of `get` calls served so far, failed ones included.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &str) -> Lookup {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if self.unavailable.load(Ordering::Relaxed) {
            return Lookup::Failed(StoreError::Transient("memory store unavailable".to_string()));
        }

        match self.entries.read().get(key) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_uses_prefixed_keys() {
        let store = MemoryStore::new();
        store.insert_a("www.example.com.", "203.0.113.5");
        store.insert_cname("docs.example.com.", "www.example.com.");

        assert_eq!(
            store.lookup_a("www.example.com.").await,
            Lookup::Found("203.0.113.5".to_string())
        );
        assert_eq!(store.lookup_cname("www.example.com.").await, Lookup::Absent);
        assert_eq!(
            store.lookup_cname("docs.example.com.").await,
            Lookup::Found("www.example.com.".to_string())
        );
        assert_eq!(store.lookups(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_transiently() {
        let store = MemoryStore::new();
        store.insert_a("www.example.com.", "203.0.113.5");
        store.set_unavailable(true);

        match store.lookup_a("www.example.com.").await {
            Lookup::Failed(e) => assert!(e.is_transient()),
            other => panic!("expected failure, got {:?}", other),
        }

        store.set_unavailable(false);
        assert!(store.lookup_a("www.example.com.").await.is_found());
    }

    #[test]
    fn test_insert_and_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.insert("a:x.example.", "192.0.2.1");
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("a:x.example."), Some("192.0.2.1".to_string()));
        assert!(store.is_empty());
    }
}
