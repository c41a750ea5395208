pub mod address;
pub mod checkpoint;
pub mod config;
mod engine;
pub mod error;
pub mod functions;
pub mod index;
mod io;
pub mod log;
mod pending;
pub mod region;
pub mod session;
pub mod status;

pub use crate::address::{Address, RecordInfo};
pub use crate::checkpoint::{
    CheckpointOutcome, CheckpointTicket, CommitException, CommitPoint, ExceptionReason,
};
pub use crate::config::StoreConfig;
pub use crate::engine::metrics::StoreMetrics;
pub use crate::error::{EngineError, EngineErrorCode, FunctionError, OperationError};
pub use crate::functions::Functions;
pub use crate::index::{KeyIndex, ShardedIndex};
pub use crate::log::HybridLog;
pub use crate::log::device::{MemoryDevice, StorageDevice};
pub use crate::region::{Region, RegionClassifier};
pub use crate::session::{Session, SessionId};
pub use crate::status::{ReadOutcome, Status};

use crate::checkpoint::CheckpointPermit;
use crate::engine::Engine;
use std::sync::Arc;
use tracing::info;

/// A record store driven by an application-supplied [`Functions`] set.
///
/// Cloning is cheap; all clones share the same log, index and sessions.
pub struct Store<F: Functions> {
    engine: Arc<Engine<F>>,
}

impl<F: Functions> Clone for Store<F> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<F: Functions> Store<F> {
    /// Opens a store over a [`ShardedIndex`] and an in-memory device.
    pub fn open(config: StoreConfig, functions: F) -> Result<Self, EngineError> {
        let index: Arc<dyn KeyIndex<F::Key>> = Arc::new(ShardedIndex::new(config.index_shards));
        let device: Arc<dyn StorageDevice<F::Key, F::Value>> = Arc::new(MemoryDevice::new());
        Self::with_collaborators(config, functions, index, device)
    }

    pub fn with_collaborators(
        config: StoreConfig,
        functions: F,
        index: Arc<dyn KeyIndex<F::Key>>,
        device: Arc<dyn StorageDevice<F::Key, F::Value>>,
    ) -> Result<Self, EngineError> {
        let engine = Engine::new(config, functions, index, device)?;
        info!(
            memory_capacity_records = engine.config.memory_capacity_records,
            mutable_records = engine.config.mutable_records(),
            io_worker_threads = engine.config.io_worker_threads,
            "store opened"
        );
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn start_session(&self) -> Session<F> {
        self.engine.open_session()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.engine.config
    }

    pub fn functions(&self) -> &F {
        &self.engine.functions
    }

    pub fn log(&self) -> &HybridLog<F::Key, F::Value> {
        &self.engine.log
    }

    pub fn index(&self) -> &dyn KeyIndex<F::Key> {
        self.engine.index.as_ref()
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.engine.metrics()
    }

    /// Runs a checkpoint on the calling thread and returns once every
    /// session's commit point was reported.
    ///
    /// Each session remembers the address of every write and every failed
    /// operation until a checkpoint reports them, so a store that never
    /// checkpoints grows that bookkeeping by one entry per write.
    pub fn checkpoint(&self) -> Result<CheckpointOutcome, EngineError> {
        Ok(CheckpointPermit::acquire(&self.engine)?.run())
    }

    /// Starts a checkpoint on a background thread. Sessions keep issuing
    /// operations meanwhile; those fall into the next commit interval.
    /// Session bookkeeping is released as with [`Store::checkpoint`].
    pub fn take_checkpoint(&self) -> Result<CheckpointTicket, EngineError> {
        CheckpointPermit::acquire(&self.engine)?.spawn()
    }
}
