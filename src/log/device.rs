use crate::address::Address;
use crate::log::record::StoredRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Backing storage for records older than the head of the log.
///
/// Reads are issued from I/O worker threads, writes from whichever thread
/// flushes the log.
pub trait StorageDevice<K, V>: Send + Sync {
    fn write(&self, address: Address, record: &StoredRecord<K, V>) -> io::Result<()>;

    /// `Ok(None)` when nothing was ever written at `address`.
    fn read(&self, address: Address) -> io::Result<Option<StoredRecord<K, V>>>;
}

/// Memory-backed device with optional read latency and fault injection.
#[derive(Debug)]
pub struct MemoryDevice<K, V> {
    records: RwLock<HashMap<Address, StoredRecord<K, V>>>,
    read_delay: Duration,
    failing_writes: Mutex<HashSet<Address>>,
    failing_reads: Mutex<HashSet<Address>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<K, V> Default for MemoryDevice<K, V> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            read_delay: Duration::ZERO,
            failing_writes: Mutex::new(HashSet::new()),
            failing_reads: Mutex::new(HashSet::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl<K, V> MemoryDevice<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_delay(delay: Duration) -> Self {
        Self {
            read_delay: delay,
            ..Self::default()
        }
    }

    /// Every write to `address` fails until [`MemoryDevice::heal`] is called.
    pub fn fail_writes_at(&self, address: Address) {
        self.failing_writes.lock().insert(address);
    }

    pub fn fail_reads_at(&self, address: Address) {
        self.failing_reads.lock().insert(address);
    }

    pub fn heal(&self) {
        self.failing_writes.lock().clear();
        self.failing_reads.lock().clear();
    }

    pub fn contains(&self, address: Address) -> bool {
        self.records.read().contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<K, V> StorageDevice<K, V> for MemoryDevice<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn write(&self, address: Address, record: &StoredRecord<K, V>) -> io::Result<()> {
        if self.failing_writes.lock().contains(&address) {
            return Err(io::Error::other(format!("injected write fault at {address}")));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.records.write().insert(address, record.clone());
        Ok(())
    }

    fn read(&self, address: Address) -> io::Result<Option<StoredRecord<K, V>>> {
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        if self.failing_reads.lock().contains(&address) {
            return Err(io::Error::other(format!("injected read fault at {address}")));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.read().get(&address).cloned())
    }
}
