//! Multi-worker job processor with shard queues and delayed enqueue.

use std::cell::Cell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::job::{Job, JobIdentity, JobShard, Priority, Reschedule};

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the processor whose worker pool this thread belongs to,
    /// or 0 for ordinary threads. Membership is a tag set on worker
    /// entry, not a thread-identity comparison.
    static DISPATCHER_OF: Cell<u64> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

struct ShardQueue {
    state: Mutex<LaneState>,
    available: Condvar,
}

struct LaneState {
    lanes: [VecDeque<Arc<dyn Job>>; Priority::LANES],
    len: usize,
}

impl LaneState {
    fn new() -> Self {
        Self {
            lanes: std::array::from_fn(|_| VecDeque::new()),
            len: 0,
        }
    }

    fn push(&mut self, job: Arc<dyn Job>, priority: Priority) {
        self.lanes[priority.lane()].push_back(job);
        self.len += 1;
    }

    fn pop_highest(&mut self) -> Option<Arc<dyn Job>> {
        for lane in &mut self.lanes {
            if let Some(job) = lane.pop_front() {
                self.len -= 1;
                return Some(job);
            }
        }
        None
    }
}

struct DelayedEntry {
    due: Instant,
    seq: u64,
    job: Arc<dyn Job>,
    priority: Priority,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline wins.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayedState {
    heap: BinaryHeap<DelayedEntry>,
    next_seq: u64,
}

// ---------------------------------------------------------------------------
// JobProcessor
// ---------------------------------------------------------------------------

struct Shared {
    id: u64,
    thread_count: usize,
    queues: Vec<ShardQueue>,
    /// Identities queued or executing right now. Holding an identity
    /// here is what makes enqueueing an equal job a no-op, so at most
    /// one job per identity is ever in flight.
    identities: Mutex<HashSet<JobIdentity>>,
    delayed: Mutex<DelayedState>,
    delayed_available: Condvar,
    executing: AtomicUsize,
    shutdown: AtomicBool,
}

impl Shared {
    fn queue_index(&self, shard: JobShard) -> usize {
        if self.queues.len() == 1 {
            0
        } else {
            match shard {
                JobShard::Even => 0,
                JobShard::Odd => 1,
            }
        }
    }

    fn queued_len(&self) -> usize {
        self.queues.iter().map(|q| q.state.lock().len).sum()
    }

    /// Reserve the job's identity and push it onto its shard queue.
    /// Returns `false` if an equal job is already queued or executing.
    fn enqueue(&self, job: Arc<dyn Job>, priority: Priority) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        if !self.identities.lock().insert(job.identity()) {
            debug!(job = %job.name(), "job coalesced with an equal queued job");
            return false;
        }
        let queue = &self.queues[self.queue_index(job.shard())];
        queue.state.lock().push(job, priority);
        queue.available.notify_one();
        true
    }

    fn enqueue_delayed(&self, job: Arc<dyn Job>, delay: Duration, priority: Priority) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut delayed = self.delayed.lock();
        let seq = delayed.next_seq;
        delayed.next_seq += 1;
        delayed.heap.push(DelayedEntry {
            due: Instant::now() + delay,
            seq,
            job,
            priority,
        });
        self.delayed_available.notify_one();
    }
}

/// A fixed pool of worker threads with coalescing shard queues.
///
/// Workers are split by index parity between the [`JobShard::Even`] and
/// [`JobShard::Odd`] queues; a single-thread pool serves both. Jobs
/// whose identity is already queued or executing are not enqueued
/// again.
pub struct JobProcessor {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl JobProcessor {
    /// Spawn a processor with `thread_count` workers (at least one).
    #[must_use]
    pub fn new(name: &str, thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let queue_count = thread_count.min(2);
        let shared = Arc::new(Shared {
            id: NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed),
            thread_count,
            queues: (0..queue_count)
                .map(|_| ShardQueue {
                    state: Mutex::new(LaneState::new()),
                    available: Condvar::new(),
                })
                .collect(),
            identities: Mutex::new(HashSet::new()),
            delayed: Mutex::new(DelayedState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            delayed_available: Condvar::new(),
            executing: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(thread_count + 1);
        for worker in 0..thread_count {
            let shared_ref = Arc::clone(&shared);
            let queue_idx = if queue_count == 1 { 0 } else { worker % 2 };
            threads.push(
                std::thread::Builder::new()
                    .name(format!("{name}-worker-{worker}"))
                    .spawn(move || worker_loop(&shared_ref, queue_idx))
                    .expect("spawn job processor worker"),
            );
        }
        {
            let shared_ref = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("{name}-delayed"))
                    .spawn(move || delayed_loop(&shared_ref))
                    .expect("spawn delayed-job thread"),
            );
        }

        Self {
            shared,
            threads: Mutex::new(threads),
        }
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count
    }

    /// Enqueue `job` at `priority`.
    ///
    /// Returns `false` (and drops the job) if an equal job is already
    /// queued or executing, or if the processor is shut down.
    pub fn queue(&self, job: Arc<dyn Job>, priority: Priority) -> bool {
        self.shared.enqueue(job, priority)
    }

    /// Enqueue `job` after `delay`. Coalescing applies when the delay
    /// elapses, not at scheduling time.
    pub fn queue_in(&self, job: Arc<dyn Job>, delay: Duration, priority: Priority) {
        self.shared.enqueue_delayed(job, delay, priority);
    }

    /// Jobs queued (including delayed) but not yet started.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.shared.queued_len() + self.shared.delayed.lock().heap.len()
    }

    /// Whether the calling thread is one of this processor's workers.
    #[must_use]
    pub fn is_dispatcher_thread(&self) -> bool {
        DISPATCHER_OF.get() == self.shared.id
    }

    /// Spin until the processor has no queued, delayed, or executing
    /// jobs, or until `timeout` elapses. Returns `true` on idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.shared.queued_len() == 0
                && self.shared.delayed.lock().heap.is_empty()
                && self.shared.executing.load(Ordering::Acquire) == 0;
            if idle {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop accepting work, wake every thread, and join the pool.
    /// Queued jobs that have not started are dropped.
    pub fn finish(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for queue in &self.shared.queues {
            queue.available.notify_all();
        }
        self.shared.delayed_available.notify_all();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Drop for JobProcessor {
    fn drop(&mut self) {
        self.finish();
    }
}

fn worker_loop(shared: &Shared, queue_idx: usize) {
    DISPATCHER_OF.set(shared.id);
    let queue = &shared.queues[queue_idx];
    loop {
        let job = {
            let mut state = queue.state.lock();
            loop {
                if let Some(job) = state.pop_highest() {
                    break job;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                queue.available.wait(&mut state);
            }
        };

        shared.executing.fetch_add(1, Ordering::AcqRel);
        let outcome = catch_unwind(AssertUnwindSafe(|| job.execute()));
        if outcome.is_err() {
            error!(job = %job.name(), "background job panicked");
        }
        shared.identities.lock().remove(&job.identity());
        if outcome.is_ok() {
            if let Some(Reschedule { priority, delay }) = job.reschedule() {
                if delay.is_zero() {
                    shared.enqueue(Arc::clone(&job), priority);
                } else {
                    shared.enqueue_delayed(Arc::clone(&job), delay, priority);
                }
            }
        }
        shared.executing.fetch_sub(1, Ordering::AcqRel);
    }
}

fn delayed_loop(shared: &Shared) {
    loop {
        let fired = {
            let mut delayed = shared.delayed.lock();
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            match delayed.heap.peek() {
                Some(entry) if entry.due <= now => delayed.heap.pop(),
                Some(entry) => {
                    let wait = entry.due - now;
                    shared.delayed_available.wait_for(&mut delayed, wait);
                    None
                }
                None => {
                    shared.delayed_available.wait(&mut delayed);
                    None
                }
            }
        };

        if let Some(entry) = fired {
            // Re-enters the normal queue path so coalescing applies now.
            shared.enqueue(entry.job, entry.priority);
        }
    }
}
