//! Operations suspended on a device read.
//!
//! A suspended operation is packaged with everything it needs to continue
//! and handed to the I/O pool. The worker reads the record, resumes the
//! operation and fires its completion callback exactly once. When a
//! strategy or completion callback panics on the worker, the completion is
//! not fired; the abandon path records an I/O failure instead, so the
//! session ledger still sees the operation end and the next commit point
//! lists it as an exception.

use crate::address::{Address, RecordInfo};
use crate::engine::{Attempt, Engine, Key, OpTicket, Step, bump};
use crate::error::OperationError;
use crate::functions::Functions;
use crate::io::IoJob;
use crate::log::record::StoredRecord;
use crate::status::{OpOutcome, Status};
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which version a suspended read wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadTarget {
    /// The key's current version, found through the index.
    Latest,
    /// Whatever record sits at the requested address.
    Exact,
}

pub(crate) enum PendingOperation<F: Functions> {
    Read {
        ticket: OpTicket,
        key: F::Key,
        input: F::Input,
        ctx: F::Context,
        address: Address,
        target: ReadTarget,
    },
    Rmw {
        ticket: OpTicket,
        key: F::Key,
        input: F::Input,
        ctx: F::Context,
        address: Address,
    },
    Delete {
        ticket: OpTicket,
        key: F::Key,
        ctx: F::Context,
        address: Address,
    },
}

impl<F: Functions> PendingOperation<F> {
    pub(crate) fn address(&self) -> Address {
        match self {
            PendingOperation::Read { address, .. }
            | PendingOperation::Rmw { address, .. }
            | PendingOperation::Delete { address, .. } => *address,
        }
    }

    pub(crate) fn ticket(&self) -> &OpTicket {
        match self {
            PendingOperation::Read { ticket, .. }
            | PendingOperation::Rmw { ticket, .. }
            | PendingOperation::Delete { ticket, .. } => ticket,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PendingOperation::Read { .. } => "read",
            PendingOperation::Rmw { .. } => "rmw",
            PendingOperation::Delete { .. } => "delete",
        }
    }
}

impl<F: Functions> Engine<F> {
    /// Queues `op` behind a device read of its address. Runs the read on the
    /// calling thread when the pool no longer accepts work.
    pub(crate) fn suspend(self: &Arc<Self>, op: PendingOperation<F>) {
        bump(&self.telemetry.pending_issued);
        let address = op.address();
        let abandoned = op.ticket().clone();
        debug!(
            serial = abandoned.serial,
            address = address.raw(),
            kind = op.kind(),
            "operation pending on device read"
        );
        let engine = Arc::clone(self);
        let job = IoJob {
            address,
            run: Box::new(move || {
                let fetched = engine.log.read_from_device(address);
                engine.resume(op, fetched);
            }),
            abandon: Box::new(move || {
                abandoned.finish(&OpOutcome::failed(OperationError::Io(
                    "pending operation abandoned by io worker".into(),
                )));
            }),
        };
        if let Err(job) = self.io.submit(job) {
            trace!(address = address.raw(), "io pool closed, resolving inline");
            (job.run)();
        }
    }

    fn resume(
        self: &Arc<Self>,
        op: PendingOperation<F>,
        fetched: io::Result<Option<StoredRecord<Key<F>, F::Value>>>,
    ) {
        bump(&self.telemetry.pending_resumed);
        debug!(
            serial = op.ticket().serial,
            address = op.address().raw(),
            kind = op.kind(),
            "resuming pending operation"
        );
        match op {
            PendingOperation::Read {
                ticket,
                key,
                input,
                ctx,
                address,
                target,
            } => self.resume_read(ticket, key, input, ctx, address, target, fetched),
            PendingOperation::Rmw {
                ticket,
                key,
                input,
                ctx,
                address,
            } => self.resume_rmw(ticket, key, input, ctx, address, fetched),
            PendingOperation::Delete {
                ticket,
                key,
                ctx,
                address,
            } => self.resume_delete(ticket, key, ctx, address, fetched),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resume_read(
        &self,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
        address: Address,
        target: ReadTarget,
        fetched: io::Result<Option<StoredRecord<Key<F>, F::Value>>>,
    ) {
        let mut output = F::Output::default();
        let (status, info) = match fetched {
            Err(err) => (
                Status::Error(OperationError::Io(err.to_string())),
                RecordInfo::default(),
            ),
            Ok(None) => (Status::NotFound, RecordInfo::default()),
            Ok(Some(stored)) => {
                let status = match stored.live_value() {
                    _ if stored.key != key || stored.info.invalid => Status::NotFound,
                    None => Status::NotFound,
                    Some(value) => {
                        match self
                            .functions
                            .single_reader(&key, &input, value, &mut output, address)
                        {
                            Ok(()) => {
                                if target == ReadTarget::Latest && self.config.copy_reads_to_tail {
                                    self.copy_read_to_tail(&key, address, value);
                                }
                                Status::Ok
                            }
                            Err(err) => Status::Error(err.into()),
                        }
                    }
                };
                (status, stored.info)
            }
        };
        self.complete_read(ticket, key, input, ctx, output, status, info);
    }

    /// Re-inserts a value fetched from the device at the tail, so the next
    /// read of the key stays in memory. Skipped when the key moved on.
    fn copy_read_to_tail(&self, key: &Key<F>, address: Address, value: &F::Value) {
        if !self.index.is_current(key, address) {
            return;
        }
        let attempt = self
            .append_and_publish(key, Some(address), false, |new_address| {
                self.functions.single_writer(key, value, new_address).map(Some)
            })
            .into_attempt();
        match attempt {
            Attempt::Done(outcome) if outcome.written.is_some() => {
                bump(&self.telemetry.read_copies);
            }
            _ => trace!(address = address.raw(), "read copy to tail skipped"),
        }
    }

    fn resume_rmw(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
        address: Address,
        fetched: io::Result<Option<StoredRecord<Key<F>, F::Value>>>,
    ) {
        let attempt = match fetched {
            Err(err) => Attempt::Done(OpOutcome::failed(OperationError::Io(err.to_string()))),
            Ok(None) => Attempt::Done(OpOutcome::failed(OperationError::Io(format!(
                "record {address} missing from device"
            )))),
            Ok(Some(stored)) => self.rmw_from_stored(&key, &input, address, &stored),
        };
        let outcome = match attempt {
            Attempt::Done(outcome) => outcome,
            Attempt::Retry => match self.rmw_step(&key, &input) {
                Step::Done(outcome) => outcome,
                Step::Suspend(address) => {
                    self.suspend(PendingOperation::Rmw {
                        ticket,
                        key,
                        input,
                        ctx,
                        address,
                    });
                    return;
                }
            },
        };
        self.complete_rmw(ticket, key, input, ctx, outcome);
    }

    fn resume_delete(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        ctx: F::Context,
        address: Address,
        fetched: io::Result<Option<StoredRecord<Key<F>, F::Value>>>,
    ) {
        let attempt = match fetched {
            Err(err) => Attempt::Done(OpOutcome::failed(OperationError::Io(err.to_string()))),
            Ok(None) => Attempt::Done(OpOutcome::failed(OperationError::Io(format!(
                "record {address} missing from device"
            )))),
            Ok(Some(stored)) => self.delete_from_stored(&key, address, &stored),
        };
        let outcome = match attempt {
            Attempt::Done(outcome) => outcome,
            Attempt::Retry => match self.delete_step(&key) {
                Step::Done(outcome) => outcome,
                Step::Suspend(address) => {
                    self.suspend(PendingOperation::Delete {
                        ticket,
                        key,
                        ctx,
                        address,
                    });
                    return;
                }
            },
        };
        self.complete_delete(ticket, key, ctx, outcome);
    }
}
