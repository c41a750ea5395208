use crate::address::Address;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self as std_mpsc, Receiver, SendError, Sender};
use tracing::error;

/// A device read plus the continuation that resumes the suspended operation.
pub(crate) struct IoJob {
    pub(crate) address: Address,
    pub(crate) run: Box<dyn FnOnce() + Send>,
    /// Runs when `run` panics. Ends the operation in the session ledger
    /// without firing its completion callback.
    pub(crate) abandon: Box<dyn FnOnce() + Send>,
}

/// Fixed pool of I/O threads. Jobs for the same address land on the same
/// worker.
#[derive(Clone)]
pub(crate) struct IoWorkerPool {
    workers: Arc<Vec<Sender<IoJob>>>,
    queued_jobs: Arc<AtomicUsize>,
}

impl IoWorkerPool {
    pub(crate) fn new(worker_threads: usize) -> std::io::Result<Self> {
        let worker_count = worker_threads.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        let queued_jobs = Arc::new(AtomicUsize::new(0));
        for i in 0..worker_count {
            let (tx, rx) = std_mpsc::channel::<IoJob>();
            let q = Arc::clone(&queued_jobs);
            std::thread::Builder::new()
                .name(format!("tierkv-io-{i}"))
                .spawn(move || run_worker(rx, q))?;
            workers.push(tx);
        }
        Ok(Self {
            workers: Arc::new(workers),
            queued_jobs,
        })
    }

    /// Hands the job back when the pool has shut down.
    pub(crate) fn submit(&self, job: IoJob) -> Result<(), IoJob> {
        let shard = (job.address.raw() as usize) % self.workers.len();
        self.queued_jobs.fetch_add(1, Ordering::Relaxed);
        if let Err(SendError(job)) = self.workers[shard].send(job) {
            self.queued_jobs.fetch_sub(1, Ordering::Relaxed);
            return Err(job);
        }
        Ok(())
    }

    pub(crate) fn queued_jobs(&self) -> usize {
        self.queued_jobs.load(Ordering::Relaxed)
    }
}

fn run_worker(rx: Receiver<IoJob>, queued_jobs: Arc<AtomicUsize>) {
    while let Ok(job) = rx.recv() {
        queued_jobs.fetch_sub(1, Ordering::Relaxed);
        let IoJob {
            address,
            run,
            abandon,
        } = job;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
        if outcome.is_err() {
            error!(
                address = address.raw(),
                "pending operation panicked while resuming"
            );
            abandon();
        }
    }
}
