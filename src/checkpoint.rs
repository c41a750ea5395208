//! Per-session commit points.
//!
//! Every session owns a [`SessionLedger`] that sees each serial it issues
//! begin and finish. A checkpoint captures each ledger's last issued serial
//! (the boundary), waits for everything up to it to settle, folds and
//! flushes the log, and then asks each ledger for its [`CommitPoint`].

use crate::address::Address;
use crate::engine::Engine;
use crate::error::{EngineError, OperationError};
use crate::functions::Functions;
use crate::session::SessionId;
use crate::status::{OpOutcome, Status};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionReason {
    /// A strategy callback failed the operation.
    Application(String),
    /// The device read the operation depended on failed.
    Io(String),
    /// The operation completed but its record did not reach the device.
    DurabilityFailed { address: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitException {
    pub serial: u64,
    pub reason: ExceptionReason,
}

/// Durability watermark of one session: every operation with a serial up to
/// and including `until_serial` has completed, and all of them except those
/// listed in `exceptions` have their effect on the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitPoint {
    pub until_serial: u64,
    pub exceptions: Vec<CommitException>,
}

impl CommitPoint {
    pub fn is_clean(&self) -> bool {
        self.exceptions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub checkpoint_id: u64,
    pub flushed_until: Address,
    /// Some session did not settle within the configured timeout; its commit
    /// point stops below the oldest unsettled operation.
    pub settle_timed_out: bool,
    pub commit_points: Vec<(SessionId, CommitPoint)>,
}

impl CheckpointOutcome {
    pub fn commit_point(&self, session: SessionId) -> Option<&CommitPoint> {
        self.commit_points
            .iter()
            .find(|(id, _)| *id == session)
            .map(|(_, cp)| cp)
    }
}

/// Resolves when a checkpoint started by [`crate::Store::take_checkpoint`]
/// has reported every session.
#[derive(Debug)]
pub struct CheckpointTicket {
    rx: oneshot::Receiver<CheckpointOutcome>,
}

impl CheckpointTicket {
    pub async fn wait(self) -> Result<CheckpointOutcome, EngineError> {
        self.rx.await.map_err(|_| worker_gone())
    }

    /// Blocking variant; must not be called from inside an async runtime.
    pub fn wait_blocking(self) -> Result<CheckpointOutcome, EngineError> {
        self.rx.blocking_recv().map_err(|_| worker_gone())
    }
}

fn worker_gone() -> EngineError {
    EngineError::Unavailable {
        message: "checkpoint worker exited before reporting".into(),
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    last_issued: u64,
    inflight: BTreeSet<u64>,
    failures: Vec<CommitException>,
    /// Addresses written since the last commit point; drained by `commit`.
    writes: Vec<(u64, Address)>,
    last_commit: u64,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct SessionLedger {
    id: SessionId,
    state: Mutex<LedgerState>,
    changed: Condvar,
}

impl SessionLedger {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            state: Mutex::new(LedgerState::default()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn begin(&self, serial: u64) {
        let mut state = self.state.lock();
        debug_assert!(serial > state.last_issued, "serials must increase");
        state.last_issued = serial;
        state.inflight.insert(serial);
    }

    /// Records the terminal outcome of `serial`. A second call for the same
    /// serial is ignored.
    pub(crate) fn finish(&self, serial: u64, outcome: &OpOutcome) {
        let mut state = self.state.lock();
        if !state.inflight.remove(&serial) {
            return;
        }
        if let Status::Error(err) = &outcome.status {
            let reason = match err {
                OperationError::Application(e) => ExceptionReason::Application(e.message.clone()),
                OperationError::Io(message) => ExceptionReason::Io(message.clone()),
            };
            state.failures.push(CommitException { serial, reason });
        }
        if let Some(address) = outcome.written {
            state.writes.push((serial, address));
        }
        drop(state);
        self.changed.notify_all();
    }

    pub(crate) fn inflight(&self) -> usize {
        self.state.lock().inflight.len()
    }

    /// Blocks until nothing is in flight or `timeout` passes. Returns the
    /// number of operations still in flight.
    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while !state.inflight.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        state.inflight.len()
    }

    pub(crate) fn capture(&self) -> u64 {
        self.state.lock().last_issued
    }

    /// Waits until every serial up to `boundary` finished, or `deadline`.
    /// Returns the highest serial below which everything has finished.
    pub(crate) fn wait_settled(&self, boundary: u64, deadline: Instant) -> u64 {
        let mut state = self.state.lock();
        loop {
            match state.inflight.first().copied() {
                Some(oldest) if oldest <= boundary => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return match state.inflight.first().copied() {
                            Some(oldest) if oldest <= boundary => oldest - 1,
                            _ => boundary,
                        };
                    }
                }
                _ => return boundary,
            }
        }
    }

    /// One past the highest address written by an operation up to `settled`.
    pub(crate) fn required_flush(&self, settled: u64) -> Address {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(serial, _)| *serial <= settled)
            .map(|(_, address)| address.next())
            .max()
            .unwrap_or(Address::INVALID)
    }

    /// Closes the commit interval ending at `settled`. A write counts as
    /// durable when it sits below `flushed_until` and is not in `failed`.
    pub(crate) fn commit(
        &self,
        settled: u64,
        flushed_until: Address,
        failed: &HashSet<Address>,
    ) -> CommitPoint {
        let mut state = self.state.lock();
        let until = settled.max(state.last_commit);

        let (mut exceptions, later_failures): (Vec<_>, Vec<_>) = std::mem::take(&mut state.failures)
            .into_iter()
            .partition(|e| e.serial <= until);
        state.failures = later_failures;

        let (covered, later_writes): (Vec<_>, Vec<_>) = std::mem::take(&mut state.writes)
            .into_iter()
            .partition(|(serial, _)| *serial <= until);
        state.writes = later_writes;
        exceptions.extend(
            covered
                .into_iter()
                .filter(|(_, address)| *address >= flushed_until || failed.contains(address))
                .map(|(serial, address)| CommitException {
                    serial,
                    reason: ExceptionReason::DurabilityFailed { address },
                }),
        );
        exceptions.sort_by_key(|e| e.serial);

        state.last_commit = until;
        CommitPoint {
            until_serial: until,
            exceptions,
        }
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Closed, drained and fully reported: the ledger can be forgotten.
    pub(crate) fn is_retired(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.inflight.is_empty() && state.last_commit >= state.last_issued
    }
}

/// Exclusive right to run a checkpoint; released on drop.
pub(crate) struct CheckpointPermit<F: Functions> {
    engine: Arc<Engine<F>>,
}

impl<F: Functions> CheckpointPermit<F> {
    pub(crate) fn acquire(engine: &Arc<Engine<F>>) -> Result<Self, EngineError> {
        engine
            .checkpoint_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::CheckpointInProgress)?;
        Ok(Self {
            engine: Arc::clone(engine),
        })
    }

    pub(crate) fn run(self) -> CheckpointOutcome {
        self.engine.run_checkpoint()
    }

    pub(crate) fn spawn(self) -> Result<CheckpointTicket, EngineError> {
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("tierkv-checkpoint".into())
            .spawn(move || {
                let outcome = self.run();
                let _ = tx.send(outcome);
            })?;
        Ok(CheckpointTicket { rx })
    }
}

impl<F: Functions> Drop for CheckpointPermit<F> {
    fn drop(&mut self) {
        self.engine.checkpoint_running.store(false, Ordering::Release);
    }
}

const FLUSH_RETRY_INTERVAL: Duration = Duration::from_millis(1);

impl<F: Functions> Engine<F> {
    pub(crate) fn run_checkpoint(&self) -> CheckpointOutcome {
        let checkpoint_id = self.checkpoints_taken.fetch_add(1, Ordering::AcqRel) + 1;
        let ledgers: Vec<Arc<SessionLedger>> = self.sessions.lock().values().cloned().collect();
        let captured: Vec<(Arc<SessionLedger>, u64)> = ledgers
            .into_iter()
            .map(|ledger| {
                let boundary = ledger.capture();
                (ledger, boundary)
            })
            .collect();

        let deadline = Instant::now() + self.config.checkpoint_settle_timeout;
        let mut settle_timed_out = false;
        let settled: Vec<(Arc<SessionLedger>, u64)> = captured
            .into_iter()
            .map(|(ledger, boundary)| {
                let settled = ledger.wait_settled(boundary, deadline);
                if settled < boundary {
                    settle_timed_out = true;
                    warn!(
                        session = %ledger.id(),
                        boundary,
                        settled,
                        "session did not settle before checkpoint timeout"
                    );
                }
                (ledger, settled)
            })
            .collect();

        let required = settled
            .iter()
            .map(|(ledger, serial)| ledger.required_flush(*serial))
            .max()
            .unwrap_or(Address::INVALID);
        self.log.fold_over();
        let mut report = self.log.flush_until(self.log.tail_address());
        while report.flushed_until < required && Instant::now() < deadline {
            // A concurrent allocation still holds a reservation below `required`.
            std::thread::sleep(FLUSH_RETRY_INTERVAL);
            self.log.fold_over();
            let next = self.log.flush_until(self.log.tail_address());
            report.written += next.written;
            report.failed = next.failed;
            report.flushed_until = next.flushed_until;
        }
        let failed: HashSet<Address> = report.failed.iter().copied().collect();

        let mut commit_points = Vec::with_capacity(settled.len());
        for (ledger, serial) in &settled {
            let commit_point = ledger.commit(*serial, report.flushed_until, &failed);
            self.functions
                .checkpoint_completion(&ledger.id(), &commit_point);
            commit_points.push((ledger.id(), commit_point));
        }
        self.sessions.lock().retain(|_, ledger| !ledger.is_retired());
        self.telemetry.checkpoints.fetch_add(1, Ordering::Relaxed);

        info!(
            checkpoint = checkpoint_id,
            sessions = commit_points.len(),
            flushed_until = report.flushed_until.raw(),
            written = report.written,
            failed = report.failed.len(),
            "checkpoint complete"
        );
        CheckpointOutcome {
            checkpoint_id,
            flushed_until: report.flushed_until,
            settle_timed_out,
            commit_points,
        }
    }
}
