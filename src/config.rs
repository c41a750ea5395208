use crate::error::EngineError;
use std::time::Duration;

/// Runtime configuration for a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Records kept resident before the oldest ones are flushed and evicted.
    pub memory_capacity_records: u64,
    /// Share of the resident records that stays in the mutable tail.
    pub mutable_fraction: f64,
    pub io_worker_threads: usize,
    pub index_shards: usize,
    /// Copy records fetched from the device back to the tail after a read.
    pub copy_reads_to_tail: bool,
    pub checkpoint_settle_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_capacity_records: 1 << 20,
            mutable_fraction: 0.9,
            io_worker_threads: std::thread::available_parallelism()
                .map(|n| n.get().clamp(2, 8))
                .unwrap_or(4),
            index_shards: 16,
            copy_reads_to_tail: false,
            checkpoint_settle_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    /// Small footprint, short settle timeout. Meant for tests and local tools.
    pub fn development() -> Self {
        Self {
            memory_capacity_records: 4096,
            io_worker_threads: 2,
            index_shards: 4,
            checkpoint_settle_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Keeps at most `capacity` records resident. Reads of anything older go
    /// through the I/O workers.
    pub fn memory_constrained(capacity: u64) -> Self {
        Self {
            memory_capacity_records: capacity,
            copy_reads_to_tail: true,
            ..Self::default()
        }
    }

    pub fn memory_capacity_records(mut self, records: u64) -> Self {
        self.memory_capacity_records = records;
        self
    }

    pub fn mutable_fraction(mut self, fraction: f64) -> Self {
        self.mutable_fraction = fraction;
        self
    }

    pub fn io_worker_threads(mut self, threads: usize) -> Self {
        self.io_worker_threads = threads;
        self
    }

    pub fn index_shards(mut self, shards: usize) -> Self {
        self.index_shards = shards;
        self
    }

    pub fn copy_reads_to_tail(mut self, enabled: bool) -> Self {
        self.copy_reads_to_tail = enabled;
        self
    }

    pub fn checkpoint_settle_timeout(mut self, timeout: Duration) -> Self {
        self.checkpoint_settle_timeout = timeout;
        self
    }

    /// Number of newest records that stay in the mutable tail.
    pub fn mutable_records(&self) -> u64 {
        (self.memory_capacity_records as f64 * self.mutable_fraction).floor() as u64
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.memory_capacity_records == 0 {
            return Err(invalid("memory_capacity_records must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.mutable_fraction) {
            return Err(invalid("mutable_fraction must be within [0, 1]"));
        }
        if self.io_worker_threads == 0 {
            return Err(invalid("io_worker_threads must be > 0"));
        }
        if self.index_shards == 0 {
            return Err(invalid("index_shards must be > 0"));
        }
        if self.checkpoint_settle_timeout.is_zero() {
            return Err(invalid("checkpoint_settle_timeout must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidConfig {
        message: message.into(),
    }
}
