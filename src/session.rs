use crate::address::Address;
use crate::checkpoint::SessionLedger;
use crate::engine::{Engine, OpTicket};
use crate::functions::Functions;
use crate::status::{ReadOutcome, Status};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single caller's thread of operations.
///
/// Each data operation gets the next serial number. A session is not shared
/// across threads; open one per worker.
pub struct Session<F: Functions> {
    id: SessionId,
    engine: Arc<Engine<F>>,
    ledger: Arc<SessionLedger>,
    next_serial: u64,
}

impl<F: Functions> Session<F> {
    pub(crate) fn new(engine: Arc<Engine<F>>, ledger: Arc<SessionLedger>) -> Self {
        Self {
            id: ledger.id(),
            engine,
            ledger,
            next_serial: 1,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Serial of the most recently issued operation, 0 before the first.
    pub fn last_serial(&self) -> u64 {
        self.next_serial - 1
    }

    /// Operations issued by this session that have not completed yet.
    pub fn pending_operations(&self) -> usize {
        self.ledger.inflight()
    }

    fn issue(&mut self) -> OpTicket {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.ledger.begin(serial);
        OpTicket::new(serial, Arc::clone(&self.ledger))
    }

    pub fn read(
        &mut self,
        key: F::Key,
        input: F::Input,
        ctx: F::Context,
    ) -> ReadOutcome<F::Output> {
        let ticket = self.issue();
        self.engine.read(ticket, key, input, ctx)
    }

    /// Reads the record at `address` instead of the key's latest version.
    /// `NotFound` when the record there belongs to another key.
    pub fn read_at_address(
        &mut self,
        key: F::Key,
        input: F::Input,
        address: Address,
        ctx: F::Context,
    ) -> ReadOutcome<F::Output> {
        let ticket = self.issue();
        self.engine.read_at_address(ticket, key, input, address, ctx)
    }

    pub fn upsert(&mut self, key: F::Key, value: F::Value, ctx: F::Context) -> Status {
        let ticket = self.issue();
        self.engine.upsert(ticket, key, value, ctx)
    }

    pub fn rmw(&mut self, key: F::Key, input: F::Input, ctx: F::Context) -> Status {
        let ticket = self.issue();
        self.engine.rmw(ticket, key, input, ctx)
    }

    pub fn delete(&mut self, key: F::Key, ctx: F::Context) -> Status {
        let ticket = self.issue();
        self.engine.delete(ticket, key, ctx)
    }

    /// Waits for this session's pending operations when `wait` is set.
    /// Returns how many are still outstanding; completions of finished ones
    /// have already fired by then.
    pub fn complete_pending(&self, wait: bool) -> usize {
        if wait {
            self.ledger.wait_idle(None)
        } else {
            self.ledger.inflight()
        }
    }

    pub fn complete_pending_timeout(&self, timeout: Duration) -> usize {
        self.ledger.wait_idle(Some(timeout))
    }
}

impl<F: Functions> fmt::Debug for Session<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("last_serial", &self.last_serial())
            .finish()
    }
}

impl<F: Functions> Drop for Session<F> {
    fn drop(&mut self) {
        self.ledger.close();
    }
}
