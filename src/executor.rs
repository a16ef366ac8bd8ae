//! Batch executor for offline reindex jobs.
//!
//! A fixed pool of named worker threads pulls boxed jobs from a
//! `crossbeam-channel` queue. It is kept apart from the online reindexer
//! threads so long batch jobs and upgrades do not starve each other.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{IndexError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the result of a submitted job.
pub struct ReindexFuture<T> {
    rx: Receiver<Result<T>>,
    result: Option<Result<T>>,
}

impl<T> ReindexFuture<T> {
    /// Block until the job has finished.
    pub fn get(mut self) -> Result<T> {
        if let Some(result) = self.result.take() {
            return result;
        }
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(IndexError::Reindex("job was dropped before completing".to_string())))
    }

    /// Poll without blocking. Returns `None` while the job is still running.
    pub fn try_get(&mut self) -> Option<Result<T>> {
        if self.result.is_none() {
            match self.rx.try_recv() {
                Ok(result) => self.result = Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.result = Some(Err(IndexError::Reindex(
                        "job was dropped before completing".to_string(),
                    )))
                }
            }
        }
        self.result.take()
    }

    pub fn is_done(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }
}

pub struct BatchExecutor {
    name: String,
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchExecutor {
    /// Start `threads` workers (at least one) named `<name>-<n>`.
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for n in 0..threads.max(1) {
            let rx = rx.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{}", name, n + 1))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })?;
            workers.push(worker);
        }
        tracing::debug!(executor = %name, threads = workers.len(), "started batch executor");
        Ok(Self {
            name,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Queue `job`. A panic inside the job is reported as a `Reindex` error
    /// through the returned future.
    pub fn submit<T, F>(&self, job: F) -> Result<ReindexFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let wrapped: Job = Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(_) => Err(IndexError::Reindex("batch job panicked".to_string())),
            };
            let _ = tx.send(result);
        });

        let queue = self.queue.lock();
        let sender = queue.as_ref().ok_or(IndexError::ExecutorShutdown)?;
        sender.send(wrapped).map_err(|_| IndexError::ExecutorShutdown)?;
        Ok(ReindexFuture { rx, result: None })
    }

    /// Close the queue and wait for every queued job to finish. No timeout.
    pub fn shutdown(&self) {
        let sender = self.queue.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!(executor = %self.name, "batch worker panicked");
            }
        }
        tracing::info!(executor = %self.name, "batch executor shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.lock().is_none()
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
