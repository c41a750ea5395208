//! In-memory hybrid log: the address allocator and region classifier the
//! mutation engine runs against.
//!
//! Records are appended at the tail. The newest `mutable_records` stay in the
//! mutable region; older ones become read-only, and once more than
//! `memory_capacity_records` are resident the oldest are flushed to the
//! [`StorageDevice`] and dropped from memory. Dropping a frame never
//! invalidates an `Arc<LogRecord>` an in-flight operation already holds.

pub mod device;
pub mod record;

use crate::address::{Address, RecordInfo};
use crate::config::StoreConfig;
use crate::region::{LogBoundaries, Region, RegionClassifier};
use device::StorageDevice;
use parking_lot::{Mutex, RwLock};
use record::{LogRecord, StoredRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of pushing part of the log to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed_until: Address,
    pub written: usize,
    /// Addresses whose device write failed. They stay resident and are
    /// retried by the next flush.
    pub failed: Vec<Address>,
}

pub struct HybridLog<K, V> {
    boundaries: LogBoundaries,
    frames: RwLock<BTreeMap<Address, Arc<LogRecord<K, V>>>>,
    /// Reserved addresses whose record is not yet in `frames`. Flushing must
    /// stop below the lowest of them.
    reserved: Mutex<BTreeSet<Address>>,
    unflushed: Mutex<BTreeSet<Address>>,
    device: Arc<dyn StorageDevice<K, V>>,
    memory_capacity: u64,
    mutable_records: u64,
    flush_lock: Mutex<()>,
}

impl<K, V> HybridLog<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &StoreConfig, device: Arc<dyn StorageDevice<K, V>>) -> Self {
        Self {
            boundaries: LogBoundaries::default(),
            frames: RwLock::new(BTreeMap::new()),
            reserved: Mutex::new(BTreeSet::new()),
            unflushed: Mutex::new(BTreeSet::new()),
            device,
            memory_capacity: config.memory_capacity_records,
            mutable_records: config.mutable_records(),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn boundaries(&self) -> &LogBoundaries {
        &self.boundaries
    }

    pub fn tail_address(&self) -> Address {
        self.boundaries.tail()
    }

    pub fn read_only_address(&self) -> Address {
        self.boundaries.read_only()
    }

    pub fn head_address(&self) -> Address {
        self.boundaries.head()
    }

    pub fn flushed_until(&self) -> Address {
        self.boundaries.flushed_until()
    }

    pub fn device(&self) -> &Arc<dyn StorageDevice<K, V>> {
        &self.device
    }

    /// The record at `address` if it is still in memory.
    pub fn resident(&self, address: Address) -> Option<Arc<LogRecord<K, V>>> {
        self.frames.read().get(&address).cloned()
    }

    pub fn resident_count(&self) -> usize {
        self.frames.read().len()
    }

    pub fn read_from_device(&self, address: Address) -> io::Result<Option<StoredRecord<K, V>>> {
        self.device.read(address)
    }

    /// Reserves a tail address, lets `make` produce the value for it and
    /// installs the record. A failing `make` leaves a hole that is never
    /// published.
    pub(crate) fn allocate_with<E>(
        &self,
        key: K,
        info: RecordInfo,
        make: impl FnOnce(Address) -> Result<Option<V>, E>,
    ) -> Result<Arc<LogRecord<K, V>>, E> {
        let address = {
            let mut reserved = self.reserved.lock();
            let address = self.boundaries.reserve();
            reserved.insert(address);
            address
        };
        let value = match make(address) {
            Ok(value) => value,
            Err(e) => {
                self.reserved.lock().remove(&address);
                return Err(e);
            }
        };
        let record = Arc::new(LogRecord::new(key, address, info, value));
        self.frames.write().insert(address, Arc::clone(&record));
        self.reserved.lock().remove(&address);
        self.boundaries.shift_read_only(Address::new(
            self.tail_address()
                .raw()
                .saturating_sub(self.mutable_records),
        ));
        Ok(record)
    }

    pub fn shift_read_only_address(&self, target: Address) -> Address {
        self.boundaries.shift_read_only(target)
    }

    /// Makes every record allocated so far read-only.
    pub fn fold_over(&self) -> Address {
        self.boundaries.shift_read_only(self.tail_address())
    }

    /// Writes read-only records below `until` to the device.
    pub fn flush_until(&self, until: Address) -> FlushReport {
        let _guard = self.flush_lock.lock();
        self.flush_locked(until)
    }

    /// Flushes and evicts everything below `target`. The read-only boundary
    /// is pulled along so nothing mutable is ever evicted.
    pub fn shift_head_address(&self, target: Address) -> FlushReport {
        let _guard = self.flush_lock.lock();
        self.evict_locked(target)
    }

    /// Evicts the oldest records once more than the configured capacity is
    /// resident. Skipped when another thread is already flushing.
    pub(crate) fn maintain(&self) {
        let tail = self.tail_address().raw();
        if tail.saturating_sub(self.head_address().raw()) <= self.memory_capacity {
            return;
        }
        let Some(_guard) = self.flush_lock.try_lock() else {
            return;
        };
        let target = Address::new(tail.saturating_sub(self.memory_capacity));
        let report = self.evict_locked(target);
        debug!(
            head = self.head_address().raw(),
            written = report.written,
            failed = report.failed.len(),
            "hybrid log evicted cold records"
        );
    }

    fn evict_locked(&self, target: Address) -> FlushReport {
        self.boundaries.shift_read_only(target);
        let report = self.flush_locked(target);
        let new_head = self.boundaries.shift_head(report.flushed_until.min(target));
        let keep = self.unflushed.lock().clone();
        let mut frames = self.frames.write();
        let evictable: Vec<Address> = frames
            .range(..new_head)
            .map(|(address, _)| *address)
            .filter(|address| !keep.contains(address))
            .collect();
        for address in evictable {
            frames.remove(&address);
        }
        report
    }

    fn flush_locked(&self, until: Address) -> FlushReport {
        let mut until = until.min(self.read_only_address());
        if let Some(lowest_reserved) = self.reserved.lock().first().copied() {
            until = until.min(lowest_reserved);
        }
        let from = self.flushed_until();
        let retry: Vec<Address> = self.unflushed.lock().iter().copied().collect();
        let batch: Vec<(Address, Arc<LogRecord<K, V>>)> = {
            let frames = self.frames.read();
            let mut batch: Vec<_> = retry
                .iter()
                .filter(|address| **address < from)
                .filter_map(|address| frames.get(address).map(|r| (*address, Arc::clone(r))))
                .collect();
            if from < until {
                batch.extend(
                    frames
                        .range(from..until)
                        .map(|(address, r)| (*address, Arc::clone(r))),
                );
            }
            batch
        };

        let mut report = FlushReport::default();
        for (address, record) in batch {
            if record.read().invalid {
                continue;
            }
            match self.device.write(address, &record.to_stored()) {
                Ok(()) => {
                    self.unflushed.lock().remove(&address);
                    report.written += 1;
                }
                Err(e) => {
                    warn!(address = address.raw(), error = %e, "device write failed during flush");
                    self.unflushed.lock().insert(address);
                    report.failed.push(address);
                }
            }
        }
        report.flushed_until = self.boundaries.mark_flushed(until.max(from));
        report
    }
}

impl<K, V> RegionClassifier for HybridLog<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn region(&self, address: Address) -> Region {
        self.boundaries.region(address)
    }
}
