use crate::address::{Address, RecordInfo};
use crate::checkpoint::{CommitException, CommitPoint, ExceptionReason};
use crate::config::StoreConfig;
use crate::error::{FunctionError, OperationError};
use crate::functions::Functions;
use crate::index::ShardedIndex;
use crate::log::device::MemoryDevice;
use crate::region::{Region, RegionClassifier};
use crate::session::SessionId;
use crate::status::Status;
use crate::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Input value every strategy rejects.
pub(crate) const REJECT: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Initial { key: u64, at: Address },
    NeedCopy { key: u64 },
    Copy { key: u64, from: Address, to: Address },
    InPlace { key: u64, at: Address },
    SingleReader { key: u64, at: Address },
    ConcurrentReader { key: u64, at: Address },
    SingleWriter { key: u64, at: Address },
    ConcurrentWriter { key: u64, at: Address },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Read {
        key: u64,
        ctx: u32,
        status: Status,
        output: i64,
        info: RecordInfo,
    },
    Upsert { key: u64, value: i64, ctx: u32 },
    Rmw { key: u64, ctx: u32, status: Status },
    Delete { key: u64, ctx: u32 },
}

/// Counter semantics: RMW adds its input, upsert overwrites. Every strategy
/// call and completion is recorded.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<Call>>,
    completions: Mutex<Vec<Completion>>,
    pub(crate) commit_points: Mutex<Vec<(SessionId, CommitPoint)>>,
    pub(crate) decline_in_place: AtomicBool,
    pub(crate) decline_concurrent_write: AtomicBool,
    pub(crate) skip_copy: AtomicBool,
    pub(crate) panic_in_single_reader: AtomicBool,
}

impl Recorder {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn completions(&self) -> Vec<Completion> {
        self.completions.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
        self.completions.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(input: i64) -> Result<(), FunctionError> {
        if input == REJECT {
            return Err(FunctionError::new("input rejected"));
        }
        Ok(())
    }
}

impl Functions for Recorder {
    type Key = u64;
    type Value = i64;
    type Input = i64;
    type Output = i64;
    type Context = u32;

    fn initial_updater(
        &self,
        key: &u64,
        input: &i64,
        address: Address,
    ) -> Result<i64, FunctionError> {
        self.record(Call::Initial { key: *key, at: address });
        Self::check(*input)?;
        Ok(*input)
    }

    fn need_copy_update(&self, key: &u64, _input: &i64, _old_value: &i64) -> bool {
        self.record(Call::NeedCopy { key: *key });
        !self.skip_copy.load(Ordering::SeqCst)
    }

    fn copy_updater(
        &self,
        key: &u64,
        input: &i64,
        old_value: &i64,
        old_address: Address,
        new_address: Address,
    ) -> Result<i64, FunctionError> {
        self.record(Call::Copy {
            key: *key,
            from: old_address,
            to: new_address,
        });
        Self::check(*input)?;
        Ok(old_value + input)
    }

    fn in_place_updater(
        &self,
        key: &u64,
        input: &i64,
        value: &mut i64,
        address: Address,
    ) -> Result<bool, FunctionError> {
        self.record(Call::InPlace { key: *key, at: address });
        Self::check(*input)?;
        if self.decline_in_place.load(Ordering::SeqCst) {
            return Ok(false);
        }
        *value += input;
        Ok(true)
    }

    fn single_reader(
        &self,
        key: &u64,
        _input: &i64,
        value: &i64,
        dst: &mut i64,
        address: Address,
    ) -> Result<(), FunctionError> {
        self.record(Call::SingleReader { key: *key, at: address });
        if self.panic_in_single_reader.load(Ordering::SeqCst) {
            panic!("single reader failed on key {key}");
        }
        *dst = *value;
        Ok(())
    }

    fn concurrent_reader(
        &self,
        key: &u64,
        _input: &i64,
        value: &i64,
        dst: &mut i64,
        address: Address,
    ) -> Result<(), FunctionError> {
        self.record(Call::ConcurrentReader { key: *key, at: address });
        *dst = *value;
        Ok(())
    }

    fn single_writer(
        &self,
        key: &u64,
        src: &i64,
        address: Address,
    ) -> Result<i64, FunctionError> {
        self.record(Call::SingleWriter { key: *key, at: address });
        Self::check(*src)?;
        Ok(*src)
    }

    fn concurrent_writer(
        &self,
        key: &u64,
        src: &i64,
        dst: &mut i64,
        address: Address,
    ) -> Result<bool, FunctionError> {
        self.record(Call::ConcurrentWriter { key: *key, at: address });
        Self::check(*src)?;
        if self.decline_concurrent_write.load(Ordering::SeqCst) {
            return Ok(false);
        }
        *dst = *src;
        Ok(true)
    }

    fn read_completion(
        &self,
        key: &u64,
        _input: &i64,
        output: &i64,
        ctx: u32,
        status: Status,
        record_info: RecordInfo,
    ) {
        self.completions.lock().push(Completion::Read {
            key: *key,
            ctx,
            status,
            output: *output,
            info: record_info,
        });
    }

    fn upsert_completion(&self, key: &u64, value: &i64, ctx: u32) {
        self.completions.lock().push(Completion::Upsert {
            key: *key,
            value: *value,
            ctx,
        });
    }

    fn rmw_completion(&self, key: &u64, _input: &i64, ctx: u32, status: Status) {
        self.completions
            .lock()
            .push(Completion::Rmw { key: *key, ctx, status });
    }

    fn delete_completion(&self, key: &u64, ctx: u32) {
        self.completions.lock().push(Completion::Delete { key: *key, ctx });
    }

    fn checkpoint_completion(&self, session_id: &SessionId, commit_point: &CommitPoint) {
        self.commit_points
            .lock()
            .push((*session_id, commit_point.clone()));
    }
}

pub(crate) fn store_on(
    config: StoreConfig,
    device: Arc<MemoryDevice<u64, i64>>,
) -> Store<Recorder> {
    Store::with_collaborators(
        config,
        Recorder::default(),
        Arc::new(ShardedIndex::new(4)),
        device,
    )
    .expect("open store")
}

pub(crate) fn store_with(config: StoreConfig) -> (Store<Recorder>, Arc<MemoryDevice<u64, i64>>) {
    let device = Arc::new(MemoryDevice::new());
    (store_on(config, device.clone()), device)
}

fn dev_store() -> Store<Recorder> {
    store_with(StoreConfig::development()).0
}

/// Every new record lands outside the mutable tail.
fn read_only_store() -> (Store<Recorder>, Arc<MemoryDevice<u64, i64>>) {
    store_with(StoreConfig::development().mutable_fraction(0.0))
}

fn evict_everything(store: &Store<Recorder>) {
    let report = store.log().shift_head_address(store.log().tail_address());
    assert!(report.failed.is_empty());
}

fn value_of(store: &Store<Recorder>, key: u64) -> Option<i64> {
    let address = store.index().find(&key)?;
    let record = store.log().resident(address)?;
    let body = record.read();
    body.value().copied()
}

const A1: Address = Address::FIRST_VALID;

fn a(raw: u64) -> Address {
    Address::new(raw)
}

#[test]
fn rmw_on_absent_key_runs_only_the_initial_updater() {
    let store = dev_store();
    let mut session = store.start_session();
    assert_eq!(session.rmw(7, 5, 1), Status::Ok);

    assert_eq!(store.functions().calls(), vec![Call::Initial { key: 7, at: A1 }]);
    assert_eq!(store.index().find(&7), Some(A1));
    assert_eq!(value_of(&store, 7), Some(5));
    assert_eq!(
        store.functions().completions(),
        vec![Completion::Rmw {
            key: 7,
            ctx: 1,
            status: Status::Ok
        }]
    );
}

#[test]
fn rmw_on_mutable_record_updates_in_place() {
    let store = dev_store();
    let mut session = store.start_session();
    session.rmw(7, 5, 0);
    session.rmw(7, 3, 0);

    assert_eq!(
        store.functions().calls(),
        vec![Call::Initial { key: 7, at: A1 }, Call::InPlace { key: 7, at: A1 }]
    );
    assert_eq!(store.index().find(&7), Some(A1));
    assert_eq!(value_of(&store, 7), Some(8));
    assert_eq!(store.metrics().in_place_updates, 1);
}

#[test]
fn declined_in_place_update_relocates_through_the_copy_path() {
    let store = dev_store();
    let mut session = store.start_session();
    session.rmw(7, 5, 0);
    store.functions().decline_in_place.store(true, Ordering::SeqCst);
    assert_eq!(session.rmw(7, 3, 2), Status::Ok);

    let a2 = A1.next();
    assert_eq!(
        store.functions().calls(),
        vec![
            Call::Initial { key: 7, at: A1 },
            Call::InPlace { key: 7, at: A1 },
            Call::NeedCopy { key: 7 },
            Call::Copy {
                key: 7,
                from: A1,
                to: a2
            },
        ]
    );
    assert!(a2 > A1);
    assert_eq!(store.index().find(&7), Some(a2));

    let old = store.log().resident(A1).expect("old record resident").info();
    assert!(!old.tombstone);
    assert_eq!(old.previous_address, Address::INVALID);
    let new = store.log().resident(a2).expect("new record resident");
    assert_eq!(new.previous_address(), A1);
    assert_eq!(value_of(&store, 7), Some(8));
    assert!(matches!(
        store.functions().completions().last(),
        Some(Completion::Rmw {
            ctx: 2,
            status: Status::Ok,
            ..
        })
    ));
}

#[test]
fn rmw_outside_mutable_tail_copies_without_trying_in_place() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.rmw(7, 5, 0);
    assert_eq!(store.log().region(A1), Region::ReadOnly);
    session.rmw(7, 3, 0);

    assert_eq!(
        store.functions().calls(),
        vec![
            Call::Initial { key: 7, at: A1 },
            Call::NeedCopy { key: 7 },
            Call::Copy {
                key: 7,
                from: A1,
                to: a(2)
            },
        ]
    );
    assert_eq!(value_of(&store, 7), Some(8));
    assert!(store.log().resident(A1).expect("resident").info().sealed);
}

#[test]
fn declined_copy_leaves_the_record_untouched() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.rmw(7, 5, 0);
    store.functions().skip_copy.store(true, Ordering::SeqCst);
    let tail = store.log().tail_address();

    assert_eq!(session.rmw(7, 3, 0), Status::Ok);
    assert_eq!(
        store.functions().calls(),
        vec![Call::Initial { key: 7, at: A1 }, Call::NeedCopy { key: 7 }]
    );
    assert_eq!(store.log().tail_address(), tail);
    assert_eq!(value_of(&store, 7), Some(5));
    assert_eq!(store.metrics().skipped_copies, 1);
}

#[test]
fn strategy_failure_is_terminal_and_skips_fallbacks() {
    let store = dev_store();
    let mut session = store.start_session();
    session.rmw(7, 5, 0);
    let status = session.rmw(7, REJECT, 4);

    let expected = Status::Error(OperationError::Application(FunctionError::new(
        "input rejected",
    )));
    assert_eq!(status, expected);
    assert_eq!(
        store.functions().calls(),
        vec![Call::Initial { key: 7, at: A1 }, Call::InPlace { key: 7, at: A1 }]
    );
    assert_eq!(value_of(&store, 7), Some(5));
    assert_eq!(
        store.functions().completions().last(),
        Some(&Completion::Rmw {
            key: 7,
            ctx: 4,
            status: expected
        })
    );
}

#[test]
fn failed_initial_update_publishes_nothing() {
    let store = dev_store();
    let mut session = store.start_session();
    assert!(session.rmw(9, REJECT, 0).error().is_some());
    assert_eq!(store.index().find(&9), None);
    assert!(store.log().resident(A1).is_none());
    assert_eq!(session.rmw(9, 1, 0), Status::Ok);
    assert_eq!(store.index().find(&9), Some(a(2)));
}

#[test]
fn read_of_mutable_record_uses_the_concurrent_reader() {
    let store = dev_store();
    let mut session = store.start_session();
    session.upsert(1, 10, 0);
    let outcome = session.read(1, 0, 3);

    assert_eq!(outcome.status, Status::Ok);
    assert_eq!(outcome.output, Some(10));
    assert_eq!(
        store.functions().calls(),
        vec![
            Call::SingleWriter { key: 1, at: A1 },
            Call::ConcurrentReader { key: 1, at: A1 },
        ]
    );
}

#[test]
fn read_of_read_only_record_uses_the_single_reader() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.upsert(1, 10, 0);
    let outcome = session.read(1, 0, 3);

    assert_eq!(outcome.output, Some(10));
    assert_eq!(
        store.functions().calls().last(),
        Some(&Call::SingleReader { key: 1, at: A1 })
    );
}

#[test]
fn read_of_absent_key_completes_not_found() {
    let store = dev_store();
    let mut session = store.start_session();
    let outcome = session.read(42, 0, 8);

    assert_eq!(outcome.status, Status::NotFound);
    assert_eq!(outcome.output, None);
    assert!(store.functions().calls().is_empty());
    assert_eq!(
        store.functions().completions(),
        vec![Completion::Read {
            key: 42,
            ctx: 8,
            status: Status::NotFound,
            output: 0,
            info: RecordInfo::default(),
        }]
    );
}

#[test]
fn read_of_evicted_record_goes_pending_and_completes_once() {
    let (store, device) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(4, 40, 0);
    evict_everything(&store);
    assert!(store.log().resident(A1).is_none());
    store.functions().clear();

    let outcome = session.read(4, 0, 9);
    assert!(outcome.status.is_pending());
    assert_eq!(outcome.output, None);
    assert_eq!(session.complete_pending(true), 0);

    assert_eq!(
        store.functions().calls(),
        vec![Call::SingleReader { key: 4, at: A1 }]
    );
    assert_eq!(
        store.functions().completions(),
        vec![Completion::Read {
            key: 4,
            ctx: 9,
            status: Status::Ok,
            output: 40,
            info: RecordInfo::new(Address::INVALID),
        }]
    );
    assert_eq!(device.read_count(), 1);
    let metrics = store.metrics();
    assert_eq!(metrics.pending_issued, 1);
    assert_eq!(metrics.pending_resumed, 1);
}

#[test]
fn failed_device_read_completes_with_io_error() {
    let (store, device) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(4, 40, 0);
    evict_everything(&store);
    device.fail_reads_at(A1);

    assert!(session.read(4, 0, 1).status.is_pending());
    session.complete_pending(true);
    match store.functions().completions().last() {
        Some(Completion::Read {
            status: Status::Error(OperationError::Io(message)),
            ..
        }) => assert!(message.contains("injected read fault")),
        other => panic!("unexpected completion: {other:?}"),
    }
}

#[test]
fn rmw_on_evicted_record_resumes_with_the_copy_path() {
    let (store, _) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(4, 40, 0);
    evict_everything(&store);
    store.functions().clear();

    assert_eq!(session.rmw(4, 2, 6), Status::Pending);
    session.complete_pending(true);

    let a2 = A1.next();
    assert_eq!(
        store.functions().calls(),
        vec![
            Call::NeedCopy { key: 4 },
            Call::Copy {
                key: 4,
                from: A1,
                to: a2
            },
        ]
    );
    assert_eq!(
        store.functions().completions(),
        vec![Completion::Rmw {
            key: 4,
            ctx: 6,
            status: Status::Ok
        }]
    );
    assert_eq!(value_of(&store, 4), Some(42));
}

#[test]
fn pending_rmw_restarts_when_the_key_moved_on() {
    let device = Arc::new(MemoryDevice::with_read_delay(Duration::from_millis(150)));
    let store = store_on(StoreConfig::development(), device);
    let mut writer = store.start_session();
    writer.upsert(4, 40, 0);
    evict_everything(&store);
    store.functions().clear();

    let mut updater = store.start_session();
    assert!(updater.rmw(4, 2, 0).is_pending());
    // Lands while the device read is still sleeping.
    writer.upsert(4, 100, 0);
    updater.complete_pending(true);

    let a2 = A1.next();
    assert_eq!(
        store.functions().calls(),
        vec![
            Call::SingleWriter { key: 4, at: a2 },
            Call::InPlace { key: 4, at: a2 },
        ]
    );
    assert_eq!(value_of(&store, 4), Some(102));
}

#[test]
fn repeated_upsert_writes_two_versions() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    assert_eq!(session.upsert(3, 30, 1), Status::Ok);
    assert_eq!(session.upsert(3, 30, 2), Status::Ok);

    assert_eq!(
        store.functions().calls(),
        vec![
            Call::SingleWriter { key: 3, at: A1 },
            Call::SingleWriter { key: 3, at: a(2) },
        ]
    );
    assert_eq!(store.index().find(&3), Some(a(2)));
    assert_eq!(
        store.functions().completions(),
        vec![
            Completion::Upsert {
                key: 3,
                value: 30,
                ctx: 1
            },
            Completion::Upsert {
                key: 3,
                value: 30,
                ctx: 2
            },
        ]
    );
    let old = store.log().resident(A1).expect("resident").info();
    assert!(!old.tombstone);
}

#[test]
fn upsert_on_mutable_record_writes_in_place() {
    let store = dev_store();
    let mut session = store.start_session();
    session.upsert(3, 30, 0);
    session.upsert(3, 31, 0);
    assert_eq!(
        store.functions().calls().last(),
        Some(&Call::ConcurrentWriter { key: 3, at: A1 })
    );
    assert_eq!(value_of(&store, 3), Some(31));
    assert_eq!(store.metrics().concurrent_writes, 1);
}

#[test]
fn declined_concurrent_write_inserts_a_new_version() {
    let store = dev_store();
    let mut session = store.start_session();
    session.upsert(3, 30, 0);
    store
        .functions()
        .decline_concurrent_write
        .store(true, Ordering::SeqCst);
    session.upsert(3, 31, 0);

    assert_eq!(
        store.functions().calls(),
        vec![
            Call::SingleWriter { key: 3, at: A1 },
            Call::ConcurrentWriter { key: 3, at: A1 },
            Call::SingleWriter { key: 3, at: a(2) },
        ]
    );
    assert_eq!(value_of(&store, 3), Some(31));
    assert_eq!(store.metrics().in_place_fallbacks, 1);
}

#[test]
fn upsert_over_evicted_record_does_not_read_the_device() {
    let (store, device) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(3, 30, 0);
    evict_everything(&store);
    assert_eq!(session.upsert(3, 31, 0), Status::Ok);
    assert_eq!(device.read_count(), 0);
    let record = store.log().resident(a(2)).expect("resident");
    assert_eq!(record.previous_address(), A1);
}

#[test]
fn delete_of_absent_key_is_not_found() {
    let store = dev_store();
    let mut session = store.start_session();
    assert_eq!(session.delete(5, 7), Status::NotFound);
    assert_eq!(store.log().tail_address(), A1);
    assert_eq!(
        store.functions().completions(),
        vec![Completion::Delete { key: 5, ctx: 7 }]
    );
}

#[test]
fn delete_of_mutable_record_sets_its_tombstone() {
    let store = dev_store();
    let mut session = store.start_session();
    session.upsert(5, 50, 0);
    assert_eq!(session.delete(5, 0), Status::Ok);

    assert_eq!(store.index().find(&5), Some(A1));
    assert!(store.log().resident(A1).expect("resident").info().tombstone);
    assert_eq!(session.read(5, 0, 0).status, Status::NotFound);
    assert_eq!(session.delete(5, 0), Status::NotFound);
}

#[test]
fn delete_outside_mutable_tail_appends_a_tombstone() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.upsert(5, 50, 0);
    assert_eq!(session.delete(5, 0), Status::Ok);

    let tombstone = store.log().resident(a(2)).expect("tombstone resident");
    assert!(tombstone.info().tombstone);
    assert_eq!(tombstone.previous_address(), A1);
    assert!(!store.log().resident(A1).expect("resident").info().tombstone);
    assert_eq!(session.read(5, 0, 0).status, Status::NotFound);
}

#[test]
fn delete_of_evicted_record_appends_a_tombstone() {
    let (store, device) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(5, 50, 0);
    evict_everything(&store);
    assert_eq!(session.delete(5, 3), Status::Pending);
    assert_eq!(session.complete_pending(true), 0);
    assert_eq!(device.read_count(), 1);
    assert_eq!(store.index().find(&5), Some(a(2)));
    assert!(store.log().resident(a(2)).expect("resident").info().tombstone);
    assert_eq!(
        store.functions().completions().last(),
        Some(&Completion::Delete { key: 5, ctx: 3 })
    );
}

#[test]
fn second_delete_across_eviction_finds_nothing_and_writes_nothing() {
    let (store, device) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(5, 50, 0);
    assert_eq!(session.delete(5, 0), Status::Ok);
    evict_everything(&store);
    let tail = store.log().tail_address();

    assert_eq!(session.delete(5, 0), Status::Pending);
    assert_eq!(session.complete_pending(true), 0);
    assert_eq!(device.read_count(), 1);
    assert_eq!(store.log().tail_address(), tail);
    assert_eq!(store.index().find(&5), Some(A1));
    assert_eq!(
        store
            .functions()
            .completions()
            .iter()
            .filter(|c| matches!(c, Completion::Delete { key: 5, .. }))
            .count(),
        2
    );

    let outcome = store.checkpoint().expect("checkpoint");
    let cp = outcome.commit_point(session.id()).expect("reported");
    assert_eq!(cp.until_serial, 3);
    assert!(cp.is_clean());
}

#[test]
fn delete_restarts_when_the_fetched_version_was_superseded() {
    let device = Arc::new(MemoryDevice::with_read_delay(Duration::from_millis(150)));
    let store = store_on(StoreConfig::development(), device);
    let mut deleter = store.start_session();
    let mut writer = store.start_session();
    writer.upsert(5, 50, 0);
    evict_everything(&store);

    assert_eq!(deleter.delete(5, 0), Status::Pending);
    writer.upsert(5, 60, 0);
    assert_eq!(deleter.complete_pending(true), 0);

    let current = store.index().find(&5).expect("key indexed");
    assert_eq!(current, a(2));
    assert!(store.log().resident(current).expect("resident").info().tombstone);
    assert_eq!(writer.read(5, 0, 0).status, Status::NotFound);
}

#[test]
fn panicking_callback_on_io_worker_skips_the_completion() {
    let (store, _) = store_with(StoreConfig::development());
    let mut session = store.start_session();
    session.upsert(3, 30, 0);
    evict_everything(&store);
    store.functions().clear();
    store
        .functions()
        .panic_in_single_reader
        .store(true, Ordering::SeqCst);

    assert!(session.read(3, 0, 9).status.is_pending());
    assert_eq!(session.complete_pending(true), 0);
    assert!(store.functions().completions().is_empty());

    let outcome = store.checkpoint().expect("checkpoint");
    let cp = outcome.commit_point(session.id()).expect("reported");
    assert_eq!(cp.until_serial, 2);
    assert_eq!(
        cp.exceptions,
        vec![CommitException {
            serial: 2,
            reason: ExceptionReason::Io("pending operation abandoned by io worker".into()),
        }]
    );
}

#[test]
fn rmw_after_delete_starts_over_from_the_initial_updater() {
    let store = dev_store();
    let mut session = store.start_session();
    session.upsert(5, 50, 0);
    session.delete(5, 0);
    store.functions().clear();

    assert_eq!(session.rmw(5, 2, 0), Status::Ok);
    assert_eq!(
        store.functions().calls(),
        vec![Call::Initial { key: 5, at: a(2) }]
    );
    assert_eq!(value_of(&store, 5), Some(2));
    let record = store.log().resident(a(2)).expect("resident");
    assert_eq!(record.previous_address(), A1);
}

#[test]
fn read_at_address_walks_older_versions() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.upsert(1, 10, 0);
    session.upsert(1, 20, 0);

    let latest = session.read(1, 0, 0);
    assert_eq!(latest.output, Some(20));
    assert_eq!(latest.record_info.previous_address, A1);

    let older = session.read_at_address(1, 0, latest.record_info.previous_address, 0);
    assert_eq!(older.output, Some(10));
    assert!(!older.record_info.has_previous());

    assert!(session.read_at_address(2, 0, A1, 0).status.is_not_found());
    assert!(session.read_at_address(1, 0, Address::INVALID, 0).status.is_not_found());
    assert!(session.read_at_address(1, 0, a(99), 0).status.is_not_found());
}

#[test]
fn read_at_address_of_evicted_record_goes_pending() {
    let (store, _) = read_only_store();
    let mut session = store.start_session();
    session.upsert(1, 10, 0);
    session.upsert(1, 20, 0);
    evict_everything(&store);

    assert!(session.read_at_address(1, 0, A1, 5).status.is_pending());
    session.complete_pending(true);
    assert!(matches!(
        store.functions().completions().last(),
        Some(Completion::Read {
            ctx: 5,
            status: Status::Ok,
            output: 10,
            ..
        })
    ));
    assert_eq!(store.index().find(&1), Some(a(2)));
}

#[test]
fn device_reads_are_copied_to_the_tail_when_enabled() {
    let (store, device) = store_with(StoreConfig::development().copy_reads_to_tail(true));
    let mut session = store.start_session();
    session.upsert(4, 40, 0);
    evict_everything(&store);

    assert!(session.read(4, 0, 0).status.is_pending());
    session.complete_pending(true);
    assert_eq!(store.index().find(&4), Some(a(2)));
    assert_eq!(store.metrics().read_copies, 1);

    let again = session.read(4, 0, 0);
    assert_eq!(again.output, Some(40));
    assert_eq!(device.read_count(), 1);
}

#[test]
fn every_issued_operation_completes_exactly_once() {
    let (store, _) = store_with(
        StoreConfig::development()
            .memory_capacity_records(8)
            .mutable_fraction(0.5),
    );
    let mut session = store.start_session();
    let mut issued = 0;
    for round in 0..5i64 {
        for key in 0..6u64 {
            session.rmw(key, round + 1, 0);
            session.read(key, 0, 0);
            issued += 2;
        }
        session.upsert(100 + round as u64, round, 0);
        session.delete(100 + round as u64, 0);
        issued += 2;
    }
    assert_eq!(session.complete_pending(true), 0);
    assert_eq!(store.functions().completions().len(), issued);
    store.functions().clear();
    for key in 0..6u64 {
        session.read(key, 0, 0);
    }
    session.complete_pending(true);
    let outputs: Vec<i64> = store
        .functions()
        .completions()
        .iter()
        .map(|c| match c {
            Completion::Read { output, .. } => *output,
            _ => -1,
        })
        .collect();
    assert_eq!(outputs, vec![15; 6]);
}
