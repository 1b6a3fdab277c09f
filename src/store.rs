use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    pub created: SystemTime,
    /// `None` never expires
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    pub fn new(value: impl Into<Bytes>, expires_at: Option<SystemTime>) -> Self {
        Entry {
            value: value.into(),
            created: SystemTime::now(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

/// Concurrent key-value map with lazy expiry. Expired entries read as absent
/// until they are deleted, overwritten or purged.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<String, Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.get_at(key, SystemTime::now())
    }

    pub fn get_at(&self, key: &str, now: SystemTime) -> Option<Entry> {
        self.read()
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        expires_at: Option<SystemTime>,
    ) {
        self.write().insert(key.into(), Entry::new(value, expires_at));
    }

    /// Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.write()
            .remove(key)
            .is_some_and(|entry| !entry.is_expired_at(SystemTime::now()))
    }

    /// Inserts many entries under a single lock acquisition and returns how
    /// many were inserted. Later entries overwrite earlier ones with the same
    /// key, and every insertion is counted.
    pub fn extend<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Entry)>,
    {
        let mut data = self.write();
        let mut inserted = 0;
        for (key, entry) in entries {
            data.insert(key, entry);
            inserted += 1;
        }
        inserted
    }

    /// Live keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = SystemTime::now();
        self.read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Physical entry count, including expired entries not yet purged.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physically removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut data = self.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        before - data.len()
    }
}

pub fn unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, SystemTime},
    };

    use super::{unix_millis, Entry, Store};

    #[test]
    fn set_get_delete() {
        let store = Store::new();
        assert!(store.get("missing").is_none());

        store.set("key", "value", None);
        assert_eq!(&store.get("key").unwrap().value[..], b"value");

        assert!(store.delete("key"));
        assert!(store.get("key").is_none());
        assert!(!store.delete("key"));
    }

    #[test]
    fn overwrite_resets_created() {
        let store = Store::new();
        store.set("key", "one", Some(SystemTime::now() + Duration::from_secs(60)));
        let first = store.get("key").unwrap();

        thread::sleep(Duration::from_millis(5));
        store.set("key", "two", None);
        let second = store.get("key").unwrap();

        assert_eq!(&second.value[..], b"two");
        assert!(second.created > first.created);
        assert_eq!(second.expires_at, None);
    }

    #[test]
    fn lazy_expiry() {
        let store = Store::new();
        let expires_at = unix_millis(1_000);
        store.set("old", "value", Some(expires_at));

        assert!(store.get("old").is_none());
        assert!(store.get_at("old", unix_millis(999)).is_some());
        assert!(store.get_at("old", expires_at).is_none());
        // Still physically present until purged
        assert_eq!(store.len(), 1);
        assert!(store.keys().is_empty());

        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn extend_counts_insertions() {
        let store = Store::new();
        store.set("a", "0", None);
        let inserted = store.extend(vec![
            ("a".to_string(), Entry::new("1", None)),
            ("b".to_string(), Entry::new("2", None)),
            ("b".to_string(), Entry::new("3", None)),
        ]);
        assert_eq!(inserted, 3);
        assert_eq!(store.len(), 2);
        assert_eq!(&store.get("a").unwrap().value[..], b"1");
        assert_eq!(&store.get("b").unwrap().value[..], b"3");
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = Arc::new(Store::new());
        let handles = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("{}-{}", t, i);
                        store.set(key.clone(), format!("value-{}", i), None);
                        let entry = store.get(&key).unwrap();
                        assert_eq!(entry.value, format!("value-{}", i).into_bytes());
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8 * 200);
    }
}
