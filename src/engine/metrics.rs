use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct EngineTelemetry {
    pub(crate) reads: AtomicU64,
    pub(crate) upserts: AtomicU64,
    pub(crate) rmws: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) pending_issued: AtomicU64,
    pub(crate) pending_resumed: AtomicU64,
    pub(crate) in_place_updates: AtomicU64,
    pub(crate) concurrent_writes: AtomicU64,
    pub(crate) copy_updates: AtomicU64,
    pub(crate) initial_updates: AtomicU64,
    pub(crate) skipped_copies: AtomicU64,
    pub(crate) in_place_fallbacks: AtomicU64,
    pub(crate) publish_retries: AtomicU64,
    pub(crate) read_copies: AtomicU64,
    pub(crate) checkpoints: AtomicU64,
}

/// Point-in-time counters of a store. All counters are cumulative since open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreMetrics {
    pub reads: u64,
    pub upserts: u64,
    pub rmws: u64,
    pub deletes: u64,
    pub pending_issued: u64,
    pub pending_resumed: u64,
    pub in_place_updates: u64,
    pub concurrent_writes: u64,
    pub copy_updates: u64,
    pub initial_updates: u64,
    /// RMWs completed without writing because the strategy declined the copy.
    pub skipped_copies: u64,
    /// In-place attempts the strategy refused, sending the operation to the
    /// copy or insert path.
    pub in_place_fallbacks: u64,
    /// Index publications lost to a concurrent writer.
    pub publish_retries: u64,
    pub read_copies: u64,
    pub checkpoints: u64,
    pub resident_records: usize,
    pub queued_io_jobs: usize,
    pub active_sessions: usize,
}

impl EngineTelemetry {
    pub(crate) fn snapshot(
        &self,
        resident_records: usize,
        queued_io_jobs: usize,
        active_sessions: usize,
    ) -> StoreMetrics {
        StoreMetrics {
            reads: self.reads.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            rmws: self.rmws.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            pending_issued: self.pending_issued.load(Ordering::Relaxed),
            pending_resumed: self.pending_resumed.load(Ordering::Relaxed),
            in_place_updates: self.in_place_updates.load(Ordering::Relaxed),
            concurrent_writes: self.concurrent_writes.load(Ordering::Relaxed),
            copy_updates: self.copy_updates.load(Ordering::Relaxed),
            initial_updates: self.initial_updates.load(Ordering::Relaxed),
            skipped_copies: self.skipped_copies.load(Ordering::Relaxed),
            in_place_fallbacks: self.in_place_fallbacks.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            read_copies: self.read_copies.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            resident_records,
            queued_io_jobs,
            active_sessions,
        }
    }
}
