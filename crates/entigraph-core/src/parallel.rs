//! Parallel execution of independent sessions.
//!
//! A [`ParallelSessionExecutor`] runs queued commands on a fixed number of
//! worker threads. Each worker owns one [`UnitOfWork`] for the whole run.
//! Commands are grouped into priority tiers; a tier is drained by all
//! workers before any of them starts on the next one. If any command fails,
//! the remaining queues are cleared and every worker discards its unit of
//! work instead of committing.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::Error;
use crate::storage::{CommitSummary, StorageEngine, UnitOfWork};

/// A unit of work run by one worker.
pub type Command<'c> = Box<dyn FnOnce(&mut UnitOfWork<'_>) -> Result<(), Error> + Send + 'c>;

/// Commands of one priority plus the latch every worker passes after
/// draining them.
struct Tier<'c> {
    priority: i32,
    queue: Mutex<VecDeque<Command<'c>>>,
    pending: Mutex<usize>,
    drained: Condvar,
}

impl<'c> Tier<'c> {
    fn new(priority: i32, commands: VecDeque<Command<'c>>, workers: usize) -> Self {
        Self {
            priority,
            queue: Mutex::new(commands),
            pending: Mutex::new(workers),
            drained: Condvar::new(),
        }
    }

    fn next(&self) -> Option<Command<'c>> {
        self.queue.lock().pop_front()
    }

    fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Count one worker as done with this tier.
    fn arrive(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Count one worker as done and block until every worker is.
    fn arrive_and_wait(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
            return;
        }
        while *pending > 0 {
            self.drained.wait(&mut pending);
        }
    }
}

/// Runs commands in parallel sessions and rolls all of them back if any
/// command fails.
///
/// ```no_run
/// use entigraph_core::storage::UnitOfWork;
/// use entigraph_core::{ParallelSessionExecutor, StorageEngine};
///
/// # fn run(engine: &StorageEngine) -> Result<(), entigraph_core::Error> {
/// let mut executor = ParallelSessionExecutor::new(engine, 4);
/// executor.add_with_priority(
///     Box::new(|uow: &mut UnitOfWork<'_>| uow.create("Customer").map(|_| ())),
///     0,
/// );
/// executor.add_with_priority(
///     Box::new(|uow: &mut UnitOfWork<'_>| uow.create("Order").map(|_| ())),
///     1,
/// );
/// executor.run()?;
/// # Ok(())
/// # }
/// ```
pub struct ParallelSessionExecutor<'c> {
    engine: &'c StorageEngine,
    workers: usize,
    delete_orphans: bool,
    commands: BTreeMap<i32, VecDeque<Command<'c>>>,
}

impl<'c> ParallelSessionExecutor<'c> {
    /// Create an executor with `workers` threads (at least one).
    pub fn new(engine: &'c StorageEngine, workers: usize) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            delete_orphans: false,
            commands: BTreeMap::new(),
        }
    }

    /// Create an executor with one worker per available core.
    pub fn with_available_parallelism(engine: &'c StorageEngine) -> Self {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(engine, workers)
    }

    /// Choose whether worker sessions delete orphans of owned collections.
    pub fn with_delete_orphans(mut self, delete: bool) -> Self {
        self.delete_orphans = delete;
        self
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a command at the default priority 0.
    pub fn add(&mut self, command: Command<'c>) {
        self.add_with_priority(command, 0);
    }

    /// Queue a command. Lower priorities run first; all commands of one
    /// priority complete before the next priority starts.
    pub fn add_with_priority(&mut self, command: Command<'c>, priority: i32) {
        self.commands.entry(priority).or_default().push_back(command);
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.values().map(VecDeque::len).sum()
    }

    /// Check if no command is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every queued command and wait for completion.
    ///
    /// Returns the commit summary of each worker. When a command fails,
    /// nothing is committed and the first error (in worker order) is
    /// returned.
    pub fn run(self) -> Result<Vec<CommitSummary>, Error> {
        let workers = self.workers;
        let tiers: Vec<Tier<'c>> = self
            .commands
            .into_iter()
            .map(|(priority, commands)| Tier::new(priority, commands, workers))
            .collect();
        let failed = AtomicBool::new(false);
        let engine = self.engine;
        let delete_orphans = self.delete_orphans;

        debug!(workers, tiers = tiers.len(), "starting parallel sessions");

        let outcomes: Vec<Result<Option<CommitSummary>, Error>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let mut outcomes = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let tiers = &tiers;
                let failed = &failed;
                let spawned = thread::Builder::new()
                    .name(format!("entigraph-session-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        let mut uow = engine.unit_of_work();
                        uow.set_delete_orphans(delete_orphans);
                        work(worker_id, uow, tiers, failed)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        tiers.iter().for_each(Tier::clear);
                        tiers.iter().for_each(Tier::arrive);
                        outcomes.push(Err(Error::WorkerFailed(format!(
                            "failed to spawn session worker: {}",
                            e
                        ))));
                    }
                }
            }
            for handle in handles {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::WorkerFailed("session worker panicked".to_string())));
                outcomes.push(outcome);
            }
            outcomes
        });

        let mut summaries = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }
}

/// Body of one worker thread. Returns `None` when the session was rolled
/// back because another worker failed.
fn work(
    worker_id: usize,
    mut uow: UnitOfWork<'_>,
    tiers: &[Tier<'_>],
    failed: &AtomicBool,
) -> Result<Option<CommitSummary>, Error> {
    let mut error = None;
    for tier in tiers {
        if error.is_none() && !failed.load(Ordering::SeqCst) {
            while let Some(command) = tier.next() {
                if let Err(e) = run_command(command, &mut uow) {
                    warn!(worker_id, priority = tier.priority, error = %e, "command failed");
                    failed.store(true, Ordering::SeqCst);
                    tiers.iter().for_each(Tier::clear);
                    error = Some(e);
                    break;
                }
            }
        }
        tier.arrive_and_wait();
    }

    if let Some(e) = error {
        warn!(worker_id, "rolling back session");
        return Err(e);
    }
    if failed.load(Ordering::SeqCst) {
        warn!(worker_id, "rolling back session after failure in another worker");
        return Ok(None);
    }
    let summary = uow.commit()?;
    debug!(
        worker_id,
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        "session committed"
    );
    Ok(Some(summary))
}

fn run_command(command: Command<'_>, uow: &mut UnitOfWork<'_>) -> Result<(), Error> {
    match panic::catch_unwind(AssertUnwindSafe(|| command(uow))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "command panicked".to_string());
            Err(Error::WorkerFailed(message))
        }
    }
}
