#![forbid(unsafe_code)]

//! Worker pools for emission fan-out and deferred-consumer flushing.
//!
//! Two pools back the engine: a **work** pool for ordinary dispatch (more
//! threads, saturated submits dropped early) and an **exit** pool for
//! deferred-consumer flushing and lower-priority teardown (fewer threads,
//! saturated submits block). Both are plain `std::thread` workers draining a
//! bounded `mpsc` channel; a bounded queue gives backpressure instead of
//! unbounded memory growth.
//!
//! Pool configuration is an explicit [`PoolConfig`] object held process-wide
//! behind a compute-once cell: call [`install`] exactly once before first
//! use to size the pools, or let the first use build them from
//! [`PoolConfig::default`]. The engine never retries work a saturated
//! executor dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use tracing::{debug, trace};

use crate::error::PoolsError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// What a saturated executor does with a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saturation {
    /// Drop the submission and report `false`.
    Reject,
    /// Block the submitter until queue space frees up.
    Block,
}

struct ExecutorShared {
    name: &'static str,
    sender: mpsc::SyncSender<Job>,
    policy: Saturation,
    dropped: AtomicU64,
}

/// Handle to a fixed-size worker pool. Cheap to clone; workers exit when the
/// last handle is dropped.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<ExecutorShared>,
}

impl Executor {
    /// Spawn `threads` named workers draining a queue of `capacity` jobs.
    #[must_use]
    pub fn fixed(name: &'static str, threads: usize, capacity: usize, policy: Saturation) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    loop {
                        let job = receiver.lock().expect("executor queue lock").recv();
                        match job {
                            Ok(job) => job(),
                            // All senders gone: pool shut down.
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn executor worker");
        }
        debug!(name, threads, capacity, "executor started");
        Self {
            shared: Arc::new(ExecutorShared {
                name,
                sender,
                policy,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a job. Returns whether it was accepted; a `Reject`-policy pool
    /// under saturation drops the job and counts it.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.submit(Box::new(job))
    }

    /// Boxed-form [`execute`](Executor::execute).
    pub fn submit(&self, job: Job) -> bool {
        match self.shared.policy {
            Saturation::Block => self.shared.sender.send(job).is_ok(),
            Saturation::Reject => match self.shared.sender.try_send(job) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(name = self.shared.name, "submission dropped, queue full");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }

    /// Pool name, used in worker thread names and log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Submissions dropped so far under the `Reject` policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.shared.name)
            .field("policy", &self.shared.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

// ─── Process-wide pools ──────────────────────────────────────────────────────

/// Sizing for the two process-wide pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub work_threads: usize,
    pub work_queue: usize,
    pub exit_threads: usize,
    pub exit_queue: usize,
}

impl Default for PoolConfig {
    /// Processor-count-derived sizing: the work pool gets `2 × parallelism`
    /// threads, the exit pool `max(2, parallelism / 2)`.
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map_or(4, usize::from);
        Self {
            work_threads: parallelism * 2,
            work_queue: 1024,
            exit_threads: (parallelism / 2).max(2),
            exit_queue: 256,
        }
    }
}

/// The two process-wide pools.
pub struct Pools {
    work: Executor,
    exit: Executor,
}

impl Pools {
    fn build(config: PoolConfig) -> Self {
        Self {
            work: Executor::fixed(
                "braid-work",
                config.work_threads,
                config.work_queue,
                Saturation::Reject,
            ),
            exit: Executor::fixed(
                "braid-exit",
                config.exit_threads,
                config.exit_queue,
                Saturation::Block,
            ),
        }
    }

    /// Dispatch fan-out pool. Saturated submits are dropped.
    #[must_use]
    pub fn work(&self) -> &Executor {
        &self.work
    }

    /// Deferred-consumer and teardown pool. Saturated submits block.
    #[must_use]
    pub fn exit(&self) -> &Executor {
        &self.exit
    }
}

static POOLS: OnceLock<Pools> = OnceLock::new();

/// Install the process-wide pools from `config`.
///
/// Single-set: fails with [`PoolsError::AlreadyInstalled`] once the pools
/// exist, whether from an earlier `install` or from first use of [`pools`].
pub fn install(config: PoolConfig) -> Result<(), PoolsError> {
    let mut installed = false;
    POOLS.get_or_init(|| {
        installed = true;
        Pools::build(config)
    });
    if installed {
        Ok(())
    } else {
        Err(PoolsError::AlreadyInstalled)
    }
}

/// The process-wide pools, built from [`PoolConfig::default`] on first use
/// if [`install`] was never called.
#[must_use]
pub fn pools() -> &'static Pools {
    POOLS.get_or_init(|| Pools::build(PoolConfig::default()))
}
