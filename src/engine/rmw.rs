use super::{Attempt, Engine, Key, OpTicket, Step, bump};
use crate::address::Address;
use crate::functions::Functions;
use crate::log::record::{LogRecord, RecordBody, StoredRecord};
use crate::pending::PendingOperation;
use crate::region::RegionClassifier;
use crate::status::{OpOutcome, Status};
use std::sync::Arc;
use tracing::trace;

impl<F: Functions> Engine<F> {
    pub(crate) fn rmw(
        self: &Arc<Self>,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
    ) -> Status {
        bump(&self.telemetry.rmws);
        match self.rmw_step(&key, &input) {
            Step::Done(outcome) => self.complete_rmw(ticket, key, input, ctx, outcome),
            Step::Suspend(address) => {
                self.suspend(PendingOperation::Rmw {
                    ticket,
                    key,
                    input,
                    ctx,
                    address,
                });
                Status::Pending
            }
        }
    }

    pub(crate) fn complete_rmw(
        &self,
        ticket: OpTicket,
        key: Key<F>,
        input: F::Input,
        ctx: F::Context,
        outcome: OpOutcome,
    ) -> Status {
        self.functions
            .rmw_completion(&key, &input, ctx, outcome.status.clone());
        self.finish(&ticket, &outcome);
        outcome.status
    }

    /// Runs the RMW against in-memory state until it completes or needs
    /// the device.
    pub(crate) fn rmw_step(&self, key: &Key<F>, input: &F::Input) -> Step {
        loop {
            let attempt = match self.index.find(key) {
                None => self.rmw_initial(key, input, None, None),
                Some(address) => match self.log.resident(address) {
                    Some(record) => self.rmw_resident(key, input, &record),
                    None => return Step::Suspend(address),
                },
            };
            if let Attempt::Done(outcome) = attempt {
                return Step::Done(outcome);
            }
        }
    }

    fn rmw_resident(
        &self,
        key: &Key<F>,
        input: &F::Input,
        record: &LogRecord<Key<F>, F::Value>,
    ) -> Attempt {
        let address = record.address();
        let mut body = record.write();
        if body.sealed {
            return Attempt::Retry;
        }
        if body.value().is_none() {
            return self.rmw_initial(key, input, Some(address), Some(&mut *body));
        }
        if self.log.is_mutable(address) {
            if let Some(value) = body.value.as_mut() {
                match self.functions.in_place_updater(key, input, value, address) {
                    Ok(true) => {
                        bump(&self.telemetry.in_place_updates);
                        return Attempt::Done(OpOutcome::wrote(address));
                    }
                    Ok(false) => {
                        bump(&self.telemetry.in_place_fallbacks);
                        trace!(address = address.raw(), "in-place update declined, copying");
                    }
                    Err(err) => return Attempt::Done(OpOutcome::failed(err)),
                }
            }
        }
        self.rmw_copy(key, input, address, &mut body)
    }

    /// Initial update for an absent key, or over a tombstone at `expected`.
    fn rmw_initial(
        &self,
        key: &Key<F>,
        input: &F::Input,
        expected: Option<Address>,
        source: Option<&mut RecordBody<F::Value>>,
    ) -> Attempt {
        let published = self.append_and_publish(key, expected, false, |address| {
            self.functions.initial_updater(key, input, address).map(Some)
        });
        let attempt = match source {
            Some(body) => published.seal(body),
            None => published.into_attempt(),
        };
        if matches!(&attempt, Attempt::Done(o) if o.written.is_some()) {
            bump(&self.telemetry.initial_updates);
        }
        attempt
    }

    fn rmw_copy(
        &self,
        key: &Key<F>,
        input: &F::Input,
        old_address: Address,
        body: &mut RecordBody<F::Value>,
    ) -> Attempt {
        let Some(old_value) = body.value() else {
            return Attempt::Retry;
        };
        if !self.functions.need_copy_update(key, input, old_value) {
            bump(&self.telemetry.skipped_copies);
            return Attempt::Done(OpOutcome::status(Status::Ok));
        }
        let published = self.append_and_publish(key, Some(old_address), false, |new_address| {
            self.functions
                .copy_updater(key, input, old_value, old_address, new_address)
                .map(Some)
        });
        let attempt = published.seal(body);
        if matches!(&attempt, Attempt::Done(o) if o.written.is_some()) {
            bump(&self.telemetry.copy_updates);
        }
        attempt
    }

    /// Continues an RMW with the version fetched from the device. Retries
    /// when `address` stopped being the key's current version meanwhile.
    pub(crate) fn rmw_from_stored(
        &self,
        key: &Key<F>,
        input: &F::Input,
        address: Address,
        stored: &StoredRecord<Key<F>, F::Value>,
    ) -> Attempt {
        if !self.index.is_current(key, address) {
            trace!(address = address.raw(), "fetched version superseded, restarting rmw");
            return Attempt::Retry;
        }
        let Some(old_value) = stored.live_value() else {
            return self.rmw_initial(key, input, Some(address), None);
        };
        if !self.functions.need_copy_update(key, input, old_value) {
            bump(&self.telemetry.skipped_copies);
            return Attempt::Done(OpOutcome::status(Status::Ok));
        }
        let attempt = self
            .append_and_publish(key, Some(address), false, |new_address| {
                self.functions
                    .copy_updater(key, input, old_value, address, new_address)
                    .map(Some)
            })
            .into_attempt();
        if matches!(&attempt, Attempt::Done(o) if o.written.is_some()) {
            bump(&self.telemetry.copy_updates);
        }
        attempt
    }
}
