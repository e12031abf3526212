//! Consistent-hash ring mapping measurement keys to shard names
//!
//! Each shard contributes a fixed number of virtual nodes, hashed as
//! `itoa(i) ‖ shard` with crc32. Lookups binary-search the sorted hash
//! list for the first virtual node at or past the key's hash, wrapping to
//! the smallest. Two rings built from the same (shards, replicas) always
//! agree, which is what lets independent relay instances route alike.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe consistent-hash ring
pub struct HashRing {
    replicas: usize,
    inner: RwLock<RingInner>,
}

struct RingInner {
    /// Sorted virtual-node hashes
    hashes: Vec<u32>,
    /// Hash to owning shard; on collision the later add wins
    shards: HashMap<u32, String>,
}

impl HashRing {
    /// Create an empty ring with `replicas` virtual nodes per shard
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            inner: RwLock::new(RingInner {
                hashes: Vec::new(),
                shards: HashMap::new(),
            }),
        }
    }

    /// Add a shard's virtual nodes to the ring
    pub fn add(&self, shard: &str) {
        let mut inner = self.inner.write();
        for i in 0..self.replicas {
            let hash = vnode_hash(i, shard);
            inner.hashes.push(hash);
            inner.shards.insert(hash, shard.to_string());
        }
        inner.hashes.sort_unstable();
    }

    /// Remove a shard's virtual nodes from the ring
    pub fn remove(&self, shard: &str) {
        let mut inner = self.inner.write();
        for i in 0..self.replicas {
            let hash = vnode_hash(i, shard);
            inner.shards.remove(&hash);
            inner.hashes.retain(|h| *h != hash);
        }
    }

    /// Shard owning `key`, or `None` when the ring has no entries
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        if inner.hashes.is_empty() {
            return None;
        }

        let hash = crc32fast::hash(key.as_bytes());
        let mut idx = inner.hashes.partition_point(|h| *h < hash);
        if idx == inner.hashes.len() {
            // cycled back to the first virtual node
            idx = 0;
        }
        inner.shards.get(&inner.hashes[idx]).cloned()
    }

    /// True when no shard has been added
    pub fn is_empty(&self) -> bool {
        self.inner.read().hashes.is_empty()
    }
}

fn vnode_hash(index: usize, shard: &str) -> u32 {
    crc32fast::hash(format!("{}{}", index, shard).as_bytes())
}
