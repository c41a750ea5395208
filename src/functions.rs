//! The strategy set an embedding application hands to the store.
//!
//! The engine decides *which* callback runs for a given operation and record
//! location; the callbacks decide *what* happens to the value. Every strategy
//! receives the logical address it works at (or from), usable as an opaque
//! record identity.

use crate::address::{Address, RecordInfo};
use crate::checkpoint::CommitPoint;
use crate::error::FunctionError;
use crate::session::SessionId;
use crate::status::Status;
use std::hash::Hash;

pub trait Functions: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Input: Send + 'static;
    type Output: Default + Send + 'static;
    /// Opaque caller token passed through to the completion callback.
    type Context: Send + 'static;

    /// RMW on an absent key: produce the first value, stored at `address`.
    fn initial_updater(
        &self,
        key: &Self::Key,
        input: &Self::Input,
        address: Address,
    ) -> Result<Self::Value, FunctionError>;

    /// RMW about to copy `old_value` to the tail. Returning `false` leaves the
    /// record as it is and completes the RMW without writing.
    fn need_copy_update(
        &self,
        _key: &Self::Key,
        _input: &Self::Input,
        _old_value: &Self::Value,
    ) -> bool {
        true
    }

    /// RMW read-copy-update: build the value stored at `new_address` from
    /// the one at `old_address`. The old address may be on the device only.
    fn copy_updater(
        &self,
        key: &Self::Key,
        input: &Self::Input,
        old_value: &Self::Value,
        old_address: Address,
        new_address: Address,
    ) -> Result<Self::Value, FunctionError>;

    /// RMW on a mutable-tail record. `Ok(false)` asks the engine to relocate
    /// the record through the copy path instead.
    fn in_place_updater(
        &self,
        key: &Self::Key,
        input: &Self::Input,
        value: &mut Self::Value,
        address: Address,
    ) -> Result<bool, FunctionError>;

    /// Read of a record outside the mutable tail, or fetched from the device.
    fn single_reader(
        &self,
        key: &Self::Key,
        input: &Self::Input,
        value: &Self::Value,
        dst: &mut Self::Output,
        address: Address,
    ) -> Result<(), FunctionError>;

    /// Read of a mutable-tail record. Other readers may run concurrently.
    fn concurrent_reader(
        &self,
        key: &Self::Key,
        input: &Self::Input,
        value: &Self::Value,
        dst: &mut Self::Output,
        address: Address,
    ) -> Result<(), FunctionError>;

    /// Upsert insert or relocation, and copies of fetched reads to the tail.
    fn single_writer(
        &self,
        key: &Self::Key,
        src: &Self::Value,
        address: Address,
    ) -> Result<Self::Value, FunctionError>;

    /// Upsert on a mutable-tail record. `Ok(false)` falls back to inserting
    /// a new record.
    fn concurrent_writer(
        &self,
        key: &Self::Key,
        src: &Self::Value,
        dst: &mut Self::Value,
        address: Address,
    ) -> Result<bool, FunctionError>;

    /// Terminal callback of a read. Completions may fire on an I/O worker
    /// thread. If a callback panics there, the operation's completion is
    /// skipped and its serial is reported as an `Io` exception at the next
    /// checkpoint.
    fn read_completion(
        &self,
        _key: &Self::Key,
        _input: &Self::Input,
        _output: &Self::Output,
        _ctx: Self::Context,
        _status: Status,
        _record_info: RecordInfo,
    ) {
    }

    fn upsert_completion(&self, _key: &Self::Key, _value: &Self::Value, _ctx: Self::Context) {}

    fn rmw_completion(
        &self,
        _key: &Self::Key,
        _input: &Self::Input,
        _ctx: Self::Context,
        _status: Status,
    ) {
    }

    fn delete_completion(&self, _key: &Self::Key, _ctx: Self::Context) {}

    /// Fired once per session at every checkpoint.
    fn checkpoint_completion(&self, _session_id: &SessionId, _commit_point: &CommitPoint) {}
}
