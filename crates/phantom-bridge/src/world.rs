//! Dedicated world-creation worker
//!
//! World creation must not run on a region thread. All requests go to one
//! background thread and run one at a time, in arrival order.

use crate::error::BridgeError;
use crossbeam::channel::{self, Sender};
use std::thread;

type WorldJob = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Job(WorldJob),
    Stop,
}

/// Thread name of the world worker
pub const WORLD_WORKER_NAME: &str = "phantom-world-worker";

/// Single background thread running world creation jobs
pub struct WorldWorker {
    sender: Option<Sender<Message>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorldWorker {
    /// Start the worker thread
    pub fn start() -> Result<Self, BridgeError> {
        let (sender, receiver) = channel::unbounded::<Message>();
        let handle = thread::Builder::new()
            .name(WORLD_WORKER_NAME.to_string())
            .spawn(move || {
                // Submitters may outlive the worker, so the channel alone
                // never closes; `Stop` ends the loop.
                for message in receiver {
                    match message {
                        Message::Job(job) => job(),
                        Message::Stop => break,
                    }
                }
                tracing::debug!("world worker stopped");
            })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// A submitter that stays usable without holding the worker
    pub fn submitter(&self) -> Option<WorldSubmitter> {
        self.sender.clone().map(|sender| WorldSubmitter { sender })
    }

    /// Run `create` on the worker and wait for its result
    pub fn run<T, F>(&self, create: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submitter().ok_or(BridgeError::ShutDown)?.run(create)
    }

    /// Stop accepting work, finish queued jobs and join the thread. Jobs
    /// sent through a [`WorldSubmitter`] afterwards fail with
    /// [`BridgeError::ShutDown`].
    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Message::Stop);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("world worker panicked");
            }
        }
    }
}

impl Drop for WorldWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable request side of a [`WorldWorker`]
#[derive(Clone)]
pub struct WorldSubmitter {
    sender: Sender<Message>,
}

impl WorldSubmitter {
    /// Run `create` on the worker and wait for its result
    pub fn run<T, F>(&self, create: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, result) = channel::bounded(1);
        self.sender
            .send(Message::Job(Box::new(move || {
                let _ = reply.send(create());
            })))
            .map_err(|_| BridgeError::ShutDown)?;
        result.recv().map_err(|_| BridgeError::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_on_named_thread() {
        let worker = WorldWorker::start().unwrap();
        let name = worker
            .run(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some(WORLD_WORKER_NAME));
    }

    #[test]
    fn test_jobs_run_in_order() {
        let worker = WorldWorker::start().unwrap();
        let log = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            worker.run(move || log.lock().push(i)).unwrap();
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stopped_worker_rejects() {
        let mut worker = WorldWorker::start().unwrap();
        let submitter = worker.submitter().unwrap();
        worker.stop();
        assert!(matches!(submitter.run(|| 1), Err(BridgeError::ShutDown)));
        assert!(matches!(worker.run(|| 1), Err(BridgeError::ShutDown)));
    }

    #[test]
    fn test_stop_finishes_queued_jobs_with_live_submitters() {
        let mut worker = WorldWorker::start().unwrap();
        let submitters: Vec<_> = (0..3).map(|_| worker.submitter().unwrap()).collect();
        let log = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        for (i, submitter) in submitters.iter().enumerate() {
            let log = log.clone();
            submitter.run(move || log.lock().push(i)).unwrap();
        }
        worker.stop();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        for submitter in &submitters {
            assert!(matches!(submitter.run(|| ()), Err(BridgeError::ShutDown)));
        }
    }
}
