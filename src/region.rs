use crate::address::Address;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where an address sits in the hybrid log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Newest records; strategies may mutate them in place.
    Mutable,
    /// In memory but read-only; updates go through a copy to the tail.
    ReadOnly,
    /// Older than the head address. May or may not still be resident.
    Stable,
}

/// Answers which region an address belongs to. The mutation engine picks
/// its strategy from this answer alone.
pub trait RegionClassifier: Send + Sync {
    fn region(&self, address: Address) -> Region;

    fn is_mutable(&self, address: Address) -> bool {
        self.region(address) == Region::Mutable
    }
}

/// The three moving boundaries of the log plus the durability watermark.
///
/// Invariant: `head <= read_only <= tail`. Every boundary only moves forward.
#[derive(Debug)]
pub struct LogBoundaries {
    tail: AtomicU64,
    read_only: AtomicU64,
    head: AtomicU64,
    flushed_until: AtomicU64,
}

impl Default for LogBoundaries {
    fn default() -> Self {
        let first = Address::FIRST_VALID.raw();
        Self {
            tail: AtomicU64::new(first),
            read_only: AtomicU64::new(first),
            head: AtomicU64::new(first),
            flushed_until: AtomicU64::new(first),
        }
    }
}

impl LogBoundaries {
    pub fn tail(&self) -> Address {
        Address::new(self.tail.load(Ordering::Acquire))
    }

    pub fn read_only(&self) -> Address {
        Address::new(self.read_only.load(Ordering::Acquire))
    }

    pub fn head(&self) -> Address {
        Address::new(self.head.load(Ordering::Acquire))
    }

    pub fn flushed_until(&self) -> Address {
        Address::new(self.flushed_until.load(Ordering::Acquire))
    }

    /// Hands out the next tail address.
    pub(crate) fn reserve(&self) -> Address {
        Address::new(self.tail.fetch_add(1, Ordering::AcqRel))
    }

    /// Moves the read-only boundary forward, never past the tail. Returns the
    /// boundary in effect afterwards.
    pub(crate) fn shift_read_only(&self, target: Address) -> Address {
        let target = target.min(self.tail());
        Address::new(advance(&self.read_only, target.raw()))
    }

    /// Moves the head forward, never past the read-only boundary.
    pub(crate) fn shift_head(&self, target: Address) -> Address {
        let target = target.min(self.read_only());
        Address::new(advance(&self.head, target.raw()))
    }

    pub(crate) fn mark_flushed(&self, until: Address) -> Address {
        Address::new(advance(&self.flushed_until, until.raw()))
    }
}

impl RegionClassifier for LogBoundaries {
    fn region(&self, address: Address) -> Region {
        if address >= self.read_only() {
            Region::Mutable
        } else if address >= self.head() {
            Region::ReadOnly
        } else {
            Region::Stable
        }
    }
}

fn advance(cell: &AtomicU64, target: u64) -> u64 {
    let mut current = cell.load(Ordering::Acquire);
    while current < target {
        match cell.compare_exchange_weak(current, target, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return target,
            Err(observed) => current = observed,
        }
    }
    current
}
