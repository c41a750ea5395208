//! Strategy dispatch for the four data operations.
//!
//! Every operation looks up the key's current address, classifies it, and
//! either mutates the record in place (mutable region, under the record's
//! exclusive lock), appends a new version at the tail and publishes it with
//! a compare-and-swap on the index, or suspends on a device read. A lost
//! publication invalidates the new record and restarts from the lookup.

pub(crate) mod metrics;
pub(crate) mod rmw;
#[cfg(test)]
pub(crate) mod tests;

use crate::address::{Address, RecordInfo};
use crate::checkpoint::SessionLedger;
use crate::config::StoreConfig;
use crate::error::{EngineError, FunctionError};
use crate::functions::Functions;
use crate::index::KeyIndex;
use crate::io::IoWorkerPool;
use crate::log::HybridLog;
use crate::log::device::StorageDevice;
use crate::log::record::{LogRecord, RecordBody, StoredRecord};
use crate::pending::{PendingOperation, ReadTarget};
use crate::region::{Region, RegionClassifier};
use crate::session::{Session, SessionId};
use crate::status::{OpOutcome, ReadOutcome, Status};
use metrics::{EngineTelemetry, StoreMetrics};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

pub(crate) type Key<F> = <F as Functions>::Key;
pub(crate) type Value<F> = <F as Functions>::Value;

/// Identifies one issued operation to the session ledger that tracks it.
#[derive(Debug, Clone)]
pub(crate) struct OpTicket {
    pub(crate) serial: u64,
    ledger: Arc<SessionLedger>,
}

impl OpTicket {
    pub(crate) fn new(serial: u64, ledger: Arc<SessionLedger>) -> Self {
        Self { serial, ledger }
    }

    pub(crate) fn finish(&self, outcome: &OpOutcome) {
        self.ledger.finish(self.serial, outcome);
    }
}

/// Result of one pass through an operation's dispatch.
#[derive(Debug)]
pub(crate) enum Attempt {
    Done(OpOutcome),
    /// The record the pass based its decision on was superseded.
    Retry,
}

/// Where a synchronous pass over in-memory state ended.
pub(crate) enum Step {
    Done(OpOutcome),
    /// The current version is on the device only.
    Suspend(Address),
}

/// Result of appending a record and publishing it in the index.
#[derive(Debug)]
pub(crate) enum Published {
    Won(Address),
    Lost,
    Failed(FunctionError),
}

impl Published {
    pub(crate) fn into_attempt(self) -> Attempt {
        match self {
            Published::Won(address) => Attempt::Done(OpOutcome::wrote(address)),
            Published::Lost => Attempt::Retry,
            Published::Failed(err) => Attempt::Done(OpOutcome::failed(err)),
        }
    }

    /// Seals the replaced resident record on success; its exclusive guard is
    /// still held by the caller.
    pub(crate) fn seal<V>(self, source: &mut RecordBody<V>) -> Attempt {
        if let Published::Won(_) = self {
            source.sealed = true;
        }
        self.into_attempt()
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) struct Engine<F: Functions> {
    pub(crate) config: StoreConfig,
    pub(crate) functions: F,
    pub(crate) log: HybridLog<Key<F>, Value<F>>,
    pub(crate) index: Arc<dyn KeyIndex<Key<F>>>,
    pub(crate) io: IoWorkerPool,
    pub(crate) sessions: Mutex<HashMap<SessionId, Arc<SessionLedger>>>,
    pub(crate) checkpoint_running: AtomicBool,
    pub(crate) checkpoints_taken: AtomicU64,
    pub(crate) telemetry: EngineTelemetry,
}

impl<F: Functions> Engine<F> {
    pub(crate) fn new(
        config: StoreConfig,
        functions: F,
        index: Arc<dyn KeyIndex<Key<F>>>,
        device: Arc<dyn StorageDevice<Key<F>, Value<F>>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let io = IoWorkerPool::new(config.io_worker_threads)?;
        Ok(Self {
            log: HybridLog::new(&config, device),
            config,
            functions,
            index,
            io,
            sessions: Mutex::new(HashMap::new()),
            checkpoint_running: AtomicBool::new(false),
            checkpoints_taken: AtomicU64::new(0),
            telemetry: EngineTelemetry::default(),
        })
    }

    pub(crate) fn open_session(self: &Arc<Self>) -> Session<F> {
        let ledger = Arc::new(SessionLedger::new(SessionId::new()));
        self.sessions
            .lock()
            .insert(ledger.id(), Arc::clone(&ledger));
        Session::new(Arc::clone(self), ledger)
    }

    pub(crate) fn metrics(&self) -> StoreMetrics {
        let active_sessions = self.sessions.lock().len();
        self.telemetry.snapshot(
            self.log.resident_count(),
            self.io.queued_jobs(),
            active_sessions,
        )
    }

    /// Records the terminal outcome and gives the log a chance to evict.
    /// Runs after the completion callback fired.
    pub(crate) fn finish(&self, ticket: &OpTicket, outcome: &OpOutcome) {
        ticket.finish(outcome);
        self.log.maintain();
    }

    /// Appends a record for `key` at the tail and publishes it over
    /// `expected`. A lost publication leaves the new record invalid.
    pub(crate) fn append_and_publish(
        &self,
        key: &Key<F>,
        expected: Option<Address>,
        tombstone: bool,
        make: impl FnOnce(Address) -> Result<Option<Value<F>>, FunctionError>,
    ) -> Published {
        let previous = expected.unwrap_or(Address::INVALID);
        let info = if tombstone {
            RecordInfo::tombstone(previous)
        } else {
            RecordInfo::new(previous)
        };
        let record = match self.log.allocate_with(key.clone(), info, make) {
            Ok(record) => record,
            Err(err) => return Published::Failed(err),
        };
        if self.index.try_publish(key, expected, record.address()) {
            Published::Won(record.address())
        } else {
            record.invalidate();
            bump(&self.telemetry.publish_retries);
            trace!(
                address = record.address().raw(),
                expected = expected.map(Address::raw),
                "index publication lost, retrying"
            );
            Published::Lost
        }
    }

    pub(crate) fn read(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
    ) -> ReadOutcome<F::Output> {
        bump(&self.telemetry.reads);
        match self.index.find(&key) {
            Some(address) => self.read_record(ticket, key, input, ctx, address, ReadTarget::Latest),
            None => self.complete_read(
                ticket,
                key,
                input,
                ctx,
                F::Output::default(),
                Status::NotFound,
                RecordInfo::default(),
            ),
        }
    }

    pub(crate) fn read_at_address(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        address: Address,
        ctx: F::Context,
    ) -> ReadOutcome<F::Output> {
        bump(&self.telemetry.reads);
        if !address.is_valid() || address >= self.log.tail_address() {
            return self.complete_read(
                ticket,
                key,
                input,
                ctx,
                F::Output::default(),
                Status::NotFound,
                RecordInfo::default(),
            );
        }
        self.read_record(ticket, key, input, ctx, address, ReadTarget::Exact)
    }

    fn read_record(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
        address: Address,
        target: ReadTarget,
    ) -> ReadOutcome<F::Output> {
        let Some(record) = self.log.resident(address) else {
            self.suspend(PendingOperation::Read {
                ticket,
                key,
                input,
                ctx,
                address,
                target,
            });
            return ReadOutcome::pending();
        };

        let mut output = F::Output::default();
        let (status, info) = {
            let body = record.read();
            let info = record.info_of(&body);
            let status = match body.value() {
                _ if record.key() != &key || body.invalid => Status::NotFound,
                None => Status::NotFound,
                Some(value) => {
                    let read = if self.log.region(address) == Region::Mutable {
                        self.functions
                            .concurrent_reader(&key, &input, value, &mut output, address)
                    } else {
                        self.functions
                            .single_reader(&key, &input, value, &mut output, address)
                    };
                    match read {
                        Ok(()) => Status::Ok,
                        Err(err) => Status::Error(err.into()),
                    }
                }
            };
            (status, info)
        };
        self.complete_read(ticket, key, input, ctx, output, status, info)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn complete_read(
        &self,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
        output: F::Output,
        status: Status,
        record_info: RecordInfo,
    ) -> ReadOutcome<F::Output> {
        self.functions
            .read_completion(&key, &input, &output, ctx, status.clone(), record_info);
        self.finish(&ticket, &OpOutcome::status(status.clone()));
        ReadOutcome {
            output: status.is_ok().then_some(output),
            status,
            record_info,
        }
    }

    pub(crate) fn upsert(
        &self,
        ticket: OpTicket,
        key: Key<F>,
        value: Value<F>,
        ctx: F::Context,
    ) -> Status {
        bump(&self.telemetry.upserts);
        let outcome = loop {
            if let Attempt::Done(outcome) = self.upsert_attempt(&key, &value) {
                break outcome;
            }
        };
        self.functions.upsert_completion(&key, &value, ctx);
        self.finish(&ticket, &outcome);
        outcome.status
    }

    fn upsert_attempt(&self, key: &Key<F>, value: &Value<F>) -> Attempt {
        let current = self.index.find(key);
        let Some(record) = current.and_then(|address| self.log.resident(address)) else {
            // Absent, or the current version lives on the device only: the
            // new value does not depend on it.
            return self
                .append_and_publish(key, current, false, |address| {
                    self.functions.single_writer(key, value, address).map(Some)
                })
                .into_attempt();
        };
        let address = record.address();
        let mut body = record.write();
        if body.sealed {
            return Attempt::Retry;
        }
        if self.log.is_mutable(address) && !body.tombstone {
            if let Some(dst) = body.value.as_mut() {
                match self.functions.concurrent_writer(key, value, dst, address) {
                    Ok(true) => {
                        bump(&self.telemetry.concurrent_writes);
                        return Attempt::Done(OpOutcome::wrote(address));
                    }
                    Ok(false) => {
                        bump(&self.telemetry.in_place_fallbacks);
                        trace!(address = address.raw(), "concurrent writer declined, inserting");
                    }
                    Err(err) => return Attempt::Done(OpOutcome::failed(err)),
                }
            }
        }
        self.append_and_publish(key, Some(address), false, |new_address| {
            self.functions.single_writer(key, value, new_address).map(Some)
        })
        .seal(&mut *body)
    }

    pub(crate) fn delete(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        ctx: F::Context,
    ) -> Status {
        bump(&self.telemetry.deletes);
        match self.delete_step(&key) {
            Step::Done(outcome) => self.complete_delete(ticket, key, ctx, outcome),
            Step::Suspend(address) => {
                self.suspend(PendingOperation::Delete {
                    ticket,
                    key,
                    ctx,
                    address,
                });
                Status::Pending
            }
        }
    }

    pub(crate) fn complete_delete(
        &self,
        ticket: OpTicket,
        key: Key<F>,
        ctx: F::Context,
        outcome: OpOutcome,
    ) -> Status {
        self.functions.delete_completion(&key, ctx);
        self.finish(&ticket, &outcome);
        outcome.status
    }

    /// Deletes against in-memory state. A current version that lives on the
    /// device only has to be fetched first: it may already be a tombstone.
    pub(crate) fn delete_step(&self, key: &Key<F>) -> Step {
        loop {
            let Some(address) = self.index.find(key) else {
                return Step::Done(OpOutcome::status(Status::NotFound));
            };
            let Some(record) = self.log.resident(address) else {
                return Step::Suspend(address);
            };
            if let Attempt::Done(outcome) = self.delete_resident(key, &record) {
                return Step::Done(outcome);
            }
        }
    }

    fn delete_resident(&self, key: &Key<F>, record: &LogRecord<Key<F>, Value<F>>) -> Attempt {
        let address = record.address();
        let mut body = record.write();
        if body.sealed {
            return Attempt::Retry;
        }
        if body.tombstone {
            return Attempt::Done(OpOutcome::status(Status::NotFound));
        }
        if self.log.is_mutable(address) {
            body.tombstone = true;
            return Attempt::Done(OpOutcome::wrote(address));
        }
        self.append_and_publish(key, Some(address), true, |_| Ok(None))
            .seal(&mut *body)
    }

    /// Continues a delete with the version fetched from the device.
    pub(crate) fn delete_from_stored(
        &self,
        key: &Key<F>,
        address: Address,
        stored: &StoredRecord<Key<F>, Value<F>>,
    ) -> Attempt {
        if !self.index.is_current(key, address) {
            trace!(address = address.raw(), "fetched version superseded, restarting delete");
            return Attempt::Retry;
        }
        if stored.live_value().is_none() {
            return Attempt::Done(OpOutcome::status(Status::NotFound));
        }
        self.append_and_publish(key, Some(address), true, |_| Ok(None))
            .into_attempt()
    }
}
