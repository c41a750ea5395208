use crate::address::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};

/// Maps each key to the address of its current record.
///
/// Every change the engine makes is a single [`KeyIndex::try_publish`]:
/// a compare-and-swap from the address the operation based its decision on
/// to the address it just populated.
pub trait KeyIndex<K>: Send + Sync {
    fn find(&self, key: &K) -> Option<Address>;

    /// Installs `new` for `key` if the current entry equals `expected`
    /// (`None` meaning "no entry"). Returns whether the swap happened.
    fn try_publish(&self, key: &K, expected: Option<Address>, new: Address) -> bool;

    /// Whether `address` is still the latest version of `key`.
    fn is_current(&self, key: &K, address: Address) -> bool {
        self.find(key) == Some(address)
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash index split into independently locked shards.
#[derive(Debug)]
pub struct ShardedIndex<K> {
    shards: Vec<RwLock<HashMap<K, Address>>>,
}

impl<K: Eq + Hash> ShardedIndex<K> {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, Address>> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.shards[(h.finish() as usize) % self.shards.len()]
    }
}

impl<K> KeyIndex<K> for ShardedIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn find(&self, key: &K) -> Option<Address> {
        self.shard(key).read().get(key).copied()
    }

    fn try_publish(&self, key: &K, expected: Option<Address>, new: Address) -> bool {
        let mut shard = self.shard(key).write();
        match (shard.entry(key.clone()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(new);
                true
            }
            (Entry::Occupied(mut slot), Some(expected)) if *slot.get() == expected => {
                debug_assert!(new > expected, "publication must move forward");
                slot.insert(new);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}
