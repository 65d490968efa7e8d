use parking_lot::RwLock;
use std::collections::HashMap;

use crate::model::Task;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

pub const SMALL_STORE_SHARDS: usize = 8;
pub const DEFAULT_SHARDS: usize = 32;
pub const LARGE_STORE_SHARDS: usize = 64;

const SMALL_STORE_LIMIT: usize = 1_000;
const LARGE_STORE_LIMIT: usize = 100_000;

/// One partition of the keyspace: its own map behind its own lock.
#[derive(Default)]
pub struct Shard {
    pub tasks: RwLock<HashMap<String, Task>>,
}

/// 32-bit FNV-1a over the raw key bytes.
pub fn fnv1a_32(key: &str) -> u32 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// More shards for larger ceilings, fewer for small ones.
pub fn shard_count_for(max_tasks: usize) -> usize {
    if max_tasks < SMALL_STORE_LIMIT {
        SMALL_STORE_SHARDS
    } else if max_tasks > LARGE_STORE_LIMIT {
        LARGE_STORE_SHARDS
    } else {
        DEFAULT_SHARDS
    }
}

pub fn new_shards(count: usize) -> Box<[Shard]> {
    (0..count).map(|_| Shard::default()).collect()
}

pub fn shard_index(key: &str, shard_count: usize) -> usize {
    fnv1a_32(key) as usize % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_shard_count() {
        assert_eq!(shard_count_for(10), 8);
        assert_eq!(shard_count_for(999), 8);
        assert_eq!(shard_count_for(1_000), 32);
        assert_eq!(shard_count_for(100_000), 32);
        assert_eq!(shard_count_for(100_001), 64);
    }

    #[test]
    fn test_shard_index_deterministic() {
        let key = uuid::Uuid::new_v4().to_string();
        let first = shard_index(&key, DEFAULT_SHARDS);
        assert_eq!(first, shard_index(&key, DEFAULT_SHARDS));
        assert!(first < DEFAULT_SHARDS);
    }

    #[test]
    fn test_random_ids_spread_over_shards() {
        let mut hits = vec![0usize; SMALL_STORE_SHARDS];
        for _ in 0..4_000 {
            let key = uuid::Uuid::new_v4().to_string();
            hits[shard_index(&key, SMALL_STORE_SHARDS)] += 1;
        }
        assert!(hits.iter().all(|&n| n > 0), "every shard receives keys: {:?}", hits);
    }
}
