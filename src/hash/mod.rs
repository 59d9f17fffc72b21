//! Consistent-hash ring used to pick a log-table shard for a given run id.
//!
//! Ported algorithmically from `tools/hash/consistent_hash.go`: each added
//! key gets `replicas` virtual nodes hashed as `"{i}{key}"`, the resulting
//! hash values are kept sorted, and a lookup walks clockwise to the first
//! virtual node hash at or after the target, wrapping around to the first
//! entry. CRC32 (IEEE) stands in for Go's `hash/crc32.ChecksumIEEE`.
//!
//! The persistent store that actually owns `run_log_<shard>` tables is an
//! external collaborator; this ring only decides which shard name a given
//! key maps to.

use std::collections::HashMap;

const DEFAULT_REPLICAS: usize = 32;

pub struct ConsistentHashRing {
    replicas: usize,
    /// Sorted virtual-node hashes.
    ring: Vec<u32>,
    hash_to_key: HashMap<u32, String>,
}

impl ConsistentHashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: if replicas == 0 { DEFAULT_REPLICAS } else { replicas },
            ring: Vec::new(),
            hash_to_key: HashMap::new(),
        }
    }

    /// Adds one or more real keys (e.g. `"shard_0"`, `"shard_1"`), each
    /// expanded into `replicas` virtual nodes.
    pub fn add(&mut self, keys: impl IntoIterator<Item = impl Into<String>>) {
        for key in keys {
            let key = key.into();
            for i in 0..self.replicas {
                let h = crc32(&format!("{i}{key}"));
                self.ring.push(h);
                self.hash_to_key.insert(h, key.clone());
            }
        }
        self.ring.sort_unstable();
    }

    /// Returns the real key owning `target`, or `None` if the ring is empty.
    pub fn get(&self, target: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let h = crc32(target);
        let idx = match self.ring.binary_search(&h) {
            Ok(i) => i,
            Err(i) => i,
        };
        let idx = if idx == self.ring.len() { 0 } else { idx };
        self.hash_to_key.get(&self.ring[idx]).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

fn crc32(s: &str) -> u32 {
    crc32fast::hash(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_returns_none() {
        let ring = ConsistentHashRing::new(8);
        assert_eq!(ring.get("anything"), None);
    }

    #[test]
    fn same_key_always_maps_to_same_shard() {
        let mut ring = ConsistentHashRing::new(16);
        ring.add(vec!["shard_0", "shard_1", "shard_2"]);
        let first = ring.get("run-abc-123").unwrap().to_string();
        for _ in 0..20 {
            assert_eq!(ring.get("run-abc-123").unwrap(), first);
        }
    }

    #[test]
    fn distributes_across_multiple_shards() {
        let mut ring = ConsistentHashRing::new(32);
        ring.add(vec!["shard_0", "shard_1", "shard_2", "shard_3"]);
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            seen.insert(ring.get(&format!("run-{i}")).unwrap().to_string());
        }
        assert!(seen.len() > 1, "expected keys to spread across shards, saw {seen:?}");
    }

    #[test]
    fn adding_more_replicas_keeps_ring_sorted() {
        let mut ring = ConsistentHashRing::new(4);
        ring.add(vec!["a", "b"]);
        let mut sorted = ring.ring.clone();
        sorted.sort_unstable();
        assert_eq!(ring.ring, sorted);
    }
}
