//! Task Distribution - Workers for the Parallel Phases
//!
//! Three ways of handing out work, one per parallel phase:
//!
//! - Forward: `RegionClaimer` gives out chunks of consecutive regions in
//!   ascending order, so every worker's compaction point only ever sees
//!   regions above the ones it already holds.
//! - Adjust: `TaskQueue::run_stealing` distributes tasks through a global
//!   injector plus per-worker FIFO deques with stealing; a pending counter
//!   detects global completion.
//! - Compact: `TaskQueue::run_in_order` takes tasks one at a time straight from
//!   the injector, so tasks start in submission order. A task that waits only
//!   on earlier tasks then always makes progress.
//!
//! Workers run inside a `crossbeam::scope`; a worker panic is re-raised on the
//! calling thread with its original payload.

use crossbeam::utils::Backoff;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use std::iter;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run `f(worker_id)` on `workers` threads and wait for all of them
///
/// A single worker runs on the calling thread.
pub fn run_workers<F>(workers: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    if workers <= 1 {
        f(0);
        return;
    }

    let outcome = crossbeam::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let f = &f;
                scope
                    .builder()
                    .name(format!("fgc-compact-{}", id))
                    .spawn(move |_| f(id))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle.join(),
                Err(e) => crate::fatal!("failed to spawn GC worker thread: {}", e),
            })
            .collect::<Vec<_>>()
    });

    match outcome {
        Ok(results) => {
            for result in results {
                if let Err(panic) = result {
                    std::panic::resume_unwind(panic);
                }
            }
        }
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Find the next task: local deque, then the injector, then other workers
fn find_task<T>(local: &Worker<T>, global: &Injector<T>, stealers: &[Stealer<T>]) -> Option<T> {
    local.pop().or_else(|| {
        iter::repeat_with(|| {
            global
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

/// TaskQueue - a batch of independent tasks for one phase
pub struct TaskQueue<T> {
    injector: Injector<T>,
    pending: AtomicUsize,
}

impl<T: Send> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            injector: Injector::new(),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, task: T) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.injector.push(task);
    }

    /// Tasks pushed and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    fn finish_one(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Process every task on `workers` threads with work stealing
    pub fn run_stealing<F>(&self, workers: usize, f: F)
    where
        F: Fn(usize, T) + Sync,
    {
        let locals: Vec<Worker<T>> = (0..workers.max(1)).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<T>> = locals.iter().map(Worker::stealer).collect();
        let slots: Vec<parking_lot::Mutex<Option<Worker<T>>>> = locals
            .into_iter()
            .map(|local| parking_lot::Mutex::new(Some(local)))
            .collect();

        run_workers(slots.len(), |id| {
            let Some(local) = slots[id].lock().take() else {
                return;
            };
            let backoff = Backoff::new();
            loop {
                match find_task(&local, &self.injector, &stealers) {
                    Some(task) => {
                        backoff.reset();
                        f(id, task);
                        self.finish_one();
                    }
                    None if self.is_empty() => break,
                    None => backoff.snooze(),
                }
            }
        });
    }

    /// Process every task on `workers` threads, starting them in push order
    pub fn run_in_order<F>(&self, workers: usize, f: F)
    where
        F: Fn(usize, T) + Sync,
    {
        run_workers(workers.max(1), |id| loop {
            match self.injector.steal() {
                Steal::Success(task) => {
                    f(id, task);
                    self.finish_one();
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        });
    }
}

impl<T: Send> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> FromIterator<T> for TaskQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = TaskQueue::new();
        for task in iter {
            queue.push(task);
        }
        queue
    }
}

/// RegionClaimer - ascending chunks of region indices
pub struct RegionClaimer {
    regions: Vec<usize>,
    chunk: usize,
    cursor: AtomicUsize,
}

impl RegionClaimer {
    /// Hand out `regions` (ascending) in chunks of `chunk`
    pub fn new(regions: Vec<usize>, chunk: usize) -> Self {
        debug_assert!(regions.windows(2).all(|w| w[0] < w[1]));
        Self {
            regions,
            chunk: chunk.max(1),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next unclaimed chunk, empty once everything is claimed
    pub fn claim(&self) -> &[usize] {
        let start = self.cursor.fetch_add(self.chunk, Ordering::AcqRel);
        if start >= self.regions.len() {
            return &[];
        }
        let end = (start + self.chunk).min(self.regions.len());
        &self.regions[start..end]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_claimer_hands_out_ascending_chunks() {
        let claimer = RegionClaimer::new(vec![1, 2, 4, 5, 9], 2);
        assert_eq!(claimer.claim(), &[1, 2]);
        assert_eq!(claimer.claim(), &[4, 5]);
        assert_eq!(claimer.claim(), &[9]);
        assert!(claimer.claim().is_empty());
        assert!(claimer.claim().is_empty());
    }

    #[test]
    fn test_claimer_concurrent_claims_are_disjoint() {
        let claimer = RegionClaimer::new((0..1000).collect(), 3);
        let seen = Mutex::new(Vec::new());
        run_workers(4, |_| loop {
            let chunk = claimer.claim();
            if chunk.is_empty() {
                break;
            }
            seen.lock().extend_from_slice(chunk);
        });
        let mut seen = seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_stealing_runs_every_task_once() {
        let queue: TaskQueue<usize> = (0..500).collect();
        let sum = AtomicUsize::new(0);
        let count = AtomicUsize::new(0);
        queue.run_stealing(4, |_, task| {
            sum.fetch_add(task, Ordering::Relaxed);
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 500);
        assert_eq!(sum.load(Ordering::Relaxed), 499 * 500 / 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_in_order_single_worker_keeps_push_order() {
        let queue: TaskQueue<usize> = (0..20).collect();
        let order = Mutex::new(Vec::new());
        queue.run_in_order(1, |_, task| order.lock().push(task));
        assert_eq!(order.into_inner(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_in_order_tasks_may_wait_on_earlier_ones() {
        // every task waits for its predecessor: only terminates if tasks
        // start in order
        let done: Vec<std::sync::atomic::AtomicBool> =
            (0..64).map(|_| std::sync::atomic::AtomicBool::new(false)).collect();
        let queue: TaskQueue<usize> = (0..64).collect();
        queue.run_in_order(4, |_, task| {
            if task > 0 {
                while !done[task - 1].load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
            }
            done[task].store(true, Ordering::Release);
        });
        assert!(done.iter().all(|d| d.load(Ordering::Acquire)));
    }

    #[test]
    #[should_panic(expected = "worker failed")]
    fn test_worker_panic_is_propagated() {
        run_workers(2, |id| {
            if id == 1 {
                panic!("worker failed");
            }
        });
    }
}
