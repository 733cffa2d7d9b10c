use bytes::Bytes;
use rand::RngCore;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use tokio::sync::RwLock;

/// Generate an opaque retrieval key. 128 random bits, hex-encoded, so keys
/// cannot be enumerated across cameras.
fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    let mut out = String::with_capacity(32);
    for byte in raw {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Key-addressable store for prepared binary artifacts (archives,
/// time-lapse renders). Keys are generated on insertion, never supplied by
/// callers. Bounded by item count with least-recently-inserted eviction;
/// artifacts live until evicted or the process exits.
pub struct ArtifactCache {
    max_items: usize,
    inner: RwLock<LruInner<String, Bytes>>,
}

impl ArtifactCache {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            inner: RwLock::new(LruInner::default()),
        }
    }

    pub async fn put(&self, data: Bytes) -> String {
        let key = generate_key();
        let mut inner = self.inner.write().await;
        inner.insert(key.clone(), data, self.max_items);
        key
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.write().await.get(key)
    }
}

/// Cache key for one polled live frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub camera_id: u32,
    pub sequence: u64,
    pub width: Option<u32>,
}

/// Short-lived cache for live pictures, letting a UI poll the same logical
/// frame repeatedly without re-hitting the daemon or the peer. Bounded LRU;
/// re-inserting an existing key replaces its value.
pub struct FrameCache {
    max_items: usize,
    inner: RwLock<LruInner<FrameKey, Bytes>>,
}

impl FrameCache {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            inner: RwLock::new(LruInner::default()),
        }
    }

    pub async fn get(&self, key: &FrameKey) -> Option<Bytes> {
        self.inner.write().await.get(key)
    }

    pub async fn insert(&self, key: FrameKey, data: Bytes) {
        let mut inner = self.inner.write().await;
        inner.insert(key, data, self.max_items);
    }
}

struct LruInner<K, V> {
    items: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> Default for LruInner<K, V> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<K: Clone + Eq + Hash, V: Clone> LruInner<K, V> {
    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (stored_key, value) = self.items.get_key_value(key)?;
        let (stored_key, value) = (stored_key.clone(), value.clone());
        self.order.retain(|k| k.borrow() != key);
        self.order.push_back(stored_key);
        Some(value)
    }

    fn insert(&mut self, key: K, value: V, max_items: usize) {
        if self.items.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        } else {
            self.order.retain(|k| *k != key);
            self.order.push_back(key);
        }

        while self.items.len() > max_items {
            if let Some(oldest) = self.order.pop_front() {
                self.items.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_exact_bytes() {
        let cache = ArtifactCache::new(8);
        let data = Bytes::from_static(b"archive contents");
        let key = cache.put(data.clone()).await;

        assert_eq!(cache.get(&key).await, Some(data));
        assert_eq!(cache.get("unused-key").await, None);
    }

    #[tokio::test]
    async fn keys_never_collide() {
        let cache = ArtifactCache::new(64);
        let a = cache.put(Bytes::from_static(b"a")).await;
        let b = cache.put(Bytes::from_static(b"a")).await;
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn artifact_cache_evicts_oldest() {
        let cache = ArtifactCache::new(2);
        let first = cache.put(Bytes::from_static(b"1")).await;
        let second = cache.put(Bytes::from_static(b"2")).await;
        let third = cache.put(Bytes::from_static(b"3")).await;

        assert_eq!(cache.get(&first).await, None);
        assert!(cache.get(&second).await.is_some());
        assert!(cache.get(&third).await.is_some());
    }

    #[tokio::test]
    async fn frame_cache_replaces_on_same_key() {
        let cache = FrameCache::new(4);
        let key = FrameKey {
            camera_id: 1,
            sequence: 10,
            width: Some(640),
        };

        cache.insert(key.clone(), Bytes::from_static(b"old")).await;
        cache.insert(key.clone(), Bytes::from_static(b"new")).await;
        assert_eq!(cache.get(&key).await, Some(Bytes::from_static(b"new")));

        let other = FrameKey {
            camera_id: 1,
            sequence: 10,
            width: None,
        };
        assert_eq!(cache.get(&other).await, None);
    }

    #[tokio::test]
    async fn frame_cache_recent_access_survives_eviction() {
        let cache = FrameCache::new(2);
        let k = |seq| FrameKey {
            camera_id: 1,
            sequence: seq,
            width: None,
        };

        cache.insert(k(1), Bytes::from_static(b"1")).await;
        cache.insert(k(2), Bytes::from_static(b"2")).await;
        // touch the oldest so the middle entry is evicted instead
        cache.get(&k(1)).await;
        cache.insert(k(3), Bytes::from_static(b"3")).await;

        assert!(cache.get(&k(1)).await.is_some());
        assert!(cache.get(&k(2)).await.is_none());
        assert!(cache.get(&k(3)).await.is_some());
    }
}
