//! Work-stealing pool for class transforms
//!
//! Jobs start in a global injector. Each worker drains a batch into its own
//! deque, and idle workers steal from a random victim. Results are sent
//! back tagged with the job's position, so the output order is the input
//! order whatever the number of workers.

use crate::error::PatchError;
use crossbeam::channel;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CWorker};
use std::thread;

/// Fixed-size pool of transform threads
#[derive(Debug, Clone, Copy)]
pub struct TransformPool {
    workers: usize,
}

impl TransformPool {
    /// Create a pool of `workers` threads (at least one)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Number of threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every job and return the results in job order.
    /// `on_result` is called on the calling thread as each result arrives,
    /// with the job position.
    pub fn run<J, T, W, P>(&self, jobs: Vec<J>, work: W, mut on_result: P) -> Result<Vec<T>, PatchError>
    where
        J: Send,
        T: Send,
        W: Fn(J) -> T + Sync,
        P: FnMut(usize, &T),
    {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let injector = Injector::new();
        for job in jobs.into_iter().enumerate() {
            injector.push(job);
        }

        let threads = self.workers.min(total);
        let deques: Vec<CWorker<(usize, J)>> = (0..threads).map(|_| CWorker::new_lifo()).collect();
        let stealers: Vec<Stealer<(usize, J)>> = deques.iter().map(CWorker::stealer).collect();

        // Placeholders, filled by position
        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let (tx, rx) = channel::unbounded::<(usize, T)>();

        let panicked = thread::scope(|scope| -> Result<usize, PatchError> {
            let mut handles = Vec::with_capacity(threads);
            for (id, deque) in deques.into_iter().enumerate() {
                let tx = tx.clone();
                let injector = &injector;
                let work = &work;
                let others: Vec<Stealer<(usize, J)>> = stealers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != id)
                    .map(|(_, s)| s.clone())
                    .collect();

                let handle = thread::Builder::new()
                    .name(format!("phantom-worker-{}", id))
                    .spawn_scoped(scope, move || {
                        while let Some((position, job)) = find_work(&deque, &others, injector) {
                            if tx.send((position, work(job))).is_err() {
                                break;
                            }
                        }
                    })?;
                handles.push(handle);
            }
            drop(tx);

            for (position, result) in rx.iter() {
                on_result(position, &result);
                slots[position] = Some(result);
            }
            Ok(handles.into_iter().map(|h| h.join()).filter(Result::is_err).count())
        })?;

        if panicked > 0 {
            return Err(PatchError::Worker(format!("{} transform worker(s) panicked", panicked)));
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| PatchError::Worker(format!("no result for job {}", position)))
            })
            .collect()
    }
}

/// Find work: local pop, then a batch from the injector, then steal
fn find_work<T>(worker: &CWorker<T>, stealers: &[Stealer<T>], injector: &Injector<T>) -> Option<T> {
    if let Some(job) = worker.pop() {
        return Some(job);
    }

    loop {
        match injector.steal_batch_and_pop(worker) {
            Steal::Success(job) => return Some(job),
            Steal::Empty => break,
            Steal::Retry => continue,
        }
    }

    steal_from_others(stealers)
}

/// Steal from a random victim first, then from the rest in turn
fn steal_from_others<T>(stealers: &[Stealer<T>]) -> Option<T> {
    use rand::Rng;

    if stealers.is_empty() {
        return None;
    }

    let start = rand::thread_rng().gen_range(0..stealers.len());
    for i in 0..stealers.len() {
        let stealer = &stealers[(start + i) % stealers.len()];
        loop {
            match stealer.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_job_order() {
        let jobs: Vec<u64> = (0..500).collect();
        let expected: Vec<u64> = jobs.iter().map(|n| n * n).collect();
        for workers in [1, 3, 8] {
            let mut seen = 0;
            let out = TransformPool::new(workers)
                .run(jobs.clone(), |n| n * n, |_, _| seen += 1)
                .unwrap();
            assert_eq!(out, expected);
            assert_eq!(seen, 500);
        }
    }

    #[test]
    fn test_every_job_runs_once() {
        let calls = AtomicUsize::new(0);
        let out = TransformPool::new(4)
            .run(
                vec!["a"; 64],
                |s| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    s.len()
                },
                |_, _| {},
            )
            .unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(calls.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn test_empty_and_zero_workers() {
        let out: Vec<u8> = TransformPool::new(0).run(Vec::<u8>::new(), |b| b, |_, _| {}).unwrap();
        assert!(out.is_empty());
        assert_eq!(TransformPool::new(0).workers(), 1);
    }

    #[test]
    fn test_worker_panic_is_an_error() {
        let result = TransformPool::new(2).run(
            vec![1, 2, 3],
            |n: i32| {
                if n == 2 {
                    panic!("boom");
                }
                n
            },
            |_, _| {},
        );
        assert!(matches!(result, Err(PatchError::Worker(_))));
    }
}
