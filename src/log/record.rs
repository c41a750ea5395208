use crate::address::{Address, RecordInfo};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Mutable part of a resident record, guarded by the record lock.
///
/// A record without a value is always a tombstone.
#[derive(Debug)]
pub struct RecordBody<V> {
    pub(crate) value: Option<V>,
    pub(crate) tombstone: bool,
    pub(crate) sealed: bool,
    pub(crate) invalid: bool,
}

impl<V> RecordBody<V> {
    pub fn value(&self) -> Option<&V> {
        if self.tombstone { None } else { self.value.as_ref() }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// A record resident in the in-memory part of the log.
///
/// The key and back-pointer never change after allocation. The shared lock
/// admits concurrent readers; the exclusive lock is the single-writer
/// guarantee in-place strategies rely on.
#[derive(Debug)]
pub struct LogRecord<K, V> {
    key: K,
    address: Address,
    previous_address: Address,
    body: RwLock<RecordBody<V>>,
}

impl<K, V> LogRecord<K, V> {
    pub(crate) fn new(key: K, address: Address, info: RecordInfo, value: Option<V>) -> Self {
        Self {
            key,
            address,
            previous_address: info.previous_address,
            body: RwLock::new(RecordBody {
                tombstone: info.tombstone || value.is_none(),
                value,
                sealed: info.sealed,
                invalid: info.invalid,
            }),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn previous_address(&self) -> Address {
        self.previous_address
    }

    pub fn info(&self) -> RecordInfo {
        self.info_of(&self.body.read())
    }

    pub(crate) fn info_of(&self, body: &RecordBody<V>) -> RecordInfo {
        RecordInfo {
            previous_address: self.previous_address,
            tombstone: body.tombstone,
            sealed: body.sealed,
            invalid: body.invalid,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RecordBody<V>> {
        self.body.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RecordBody<V>> {
        self.body.write()
    }

    pub(crate) fn invalidate(&self) {
        self.body.write().invalid = true;
    }
}

impl<K: Clone, V: Clone> LogRecord<K, V> {
    pub fn to_stored(&self) -> StoredRecord<K, V> {
        let body = self.body.read();
        StoredRecord {
            key: self.key.clone(),
            value: body.value.clone(),
            info: self.info_of(&body),
        }
    }
}

/// Owned copy of a record, as written to and read back from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord<K, V> {
    pub key: K,
    pub value: Option<V>,
    pub info: RecordInfo,
}

impl<K, V> StoredRecord<K, V> {
    pub fn live_value(&self) -> Option<&V> {
        if self.info.tombstone {
            None
        } else {
            self.value.as_ref()
        }
    }
}
