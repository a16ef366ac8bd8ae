//! Online reindexer: rebuild one index at a newer schema version in the
//! background, then switch searches over to it.
//!
//! # Architecture
//!
//! Each logical index gets one supervisor thread that exclusively owns the
//! reindexer state (`old_version`, `new_version`, the running worker). Callers
//! talk to it through an [`OnlineReindexer`] handle over a channel:
//!
//! - `Start` spawns a dedicated worker thread named
//!   `Reindex <name> v<old>-v<new>`, unless one is already running
//! - `Activate` promotes the write index synchronously
//! - `Status` answers a snapshot
//!
//! The worker reports back on a second channel. Activation always happens on
//! the supervisor thread, so a run and an explicit activation can never
//! overlap. At most one worker exists per index at any time.
//!
//! Activation order: publish the new search index, mark it ready, then retire
//! the other write indexes. There is never a moment without a search index.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{IndexError, Result};
use crate::index::{IndexAllOptions, IndexDefinition, ReindexResult};
use crate::listener::UpgradeListeners;

/// Snapshot of a reindexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexerStatus {
    pub name: String,
    pub old_version: u32,
    pub new_version: u32,
    pub running: bool,
}

/// How a `Start` request treats a run already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conflict {
    /// Reply `Ok(false)`.
    Ignore,
    /// Reply `ReindexerAlreadyRunning`.
    Reject,
}

enum Request {
    Start {
        conflict: Conflict,
        /// Skip when searches already use `new_version`.
        only_if_behind: bool,
        reply: Sender<Result<bool>>,
    },
    Activate {
        only_if_behind: bool,
        reply: Sender<Result<bool>>,
    },
    Status {
        reply: Sender<ReindexerStatus>,
    },
    Shutdown,
}

enum RunOutcome {
    Completed(ReindexResult),
    Failed(IndexError),
    Panicked(String),
}

/// Handle to the supervisor of one index.
pub struct OnlineReindexer {
    name: String,
    new_version: u32,
    requests: Sender<Request>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl OnlineReindexer {
    /// Spawn the supervisor for `def`, reindexing from `old_version` to
    /// `new_version`. No run starts until [`start`](Self::start) is called.
    pub fn spawn(
        def: Arc<IndexDefinition>,
        old_version: u32,
        new_version: u32,
        listeners: UpgradeListeners,
    ) -> Result<Self> {
        let name = def.name().to_string();
        let (requests, rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let supervisor = Supervisor {
            def,
            old_version,
            new_version,
            listeners,
            worker: None,
            done_tx,
        };
        let handle = thread::Builder::new()
            .name(format!("reindexer-{}", name))
            .spawn(move || supervisor.run(rx, done_rx))?;

        Ok(Self {
            name,
            new_version,
            requests,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version searches use as far as the supervisor knows. Equals
    /// [`version`](Self::version) once an activation has happened.
    pub fn old_version(&self) -> Result<u32> {
        self.status().map(|s| s.old_version)
    }

    /// Target schema version of this reindexer.
    pub fn version(&self) -> u32 {
        self.new_version
    }

    /// Start a run. Returns `Ok(false)` without doing anything if a run is
    /// already in flight.
    pub fn start(&self) -> Result<bool> {
        self.call(|reply| Request::Start {
            conflict: Conflict::Ignore,
            only_if_behind: false,
            reply,
        })?
    }

    /// Start a run, failing with `ReindexerAlreadyRunning` if one is in
    /// flight. Unless `force`, nothing happens when searches already use the
    /// target version. The check and the start are atomic.
    pub fn start_exclusive(&self, force: bool) -> Result<bool> {
        self.call(|reply| Request::Start {
            conflict: Conflict::Reject,
            only_if_behind: !force,
            reply,
        })?
    }

    /// Promote the target write index to search index without reindexing.
    /// Fails with `ReindexerAlreadyRunning` while a run is in flight.
    pub fn activate_index(&self) -> Result<()> {
        self.call(|reply| Request::Activate {
            only_if_behind: false,
            reply,
        })?
        .map(|_| ())
    }

    /// Like [`activate_index`](Self::activate_index), but a no-op returning
    /// `Ok(false)` when searches already use the target version.
    pub fn activate_if_behind(&self) -> Result<bool> {
        self.call(|reply| Request::Activate {
            only_if_behind: true,
            reply,
        })?
    }

    pub fn status(&self) -> Result<ReindexerStatus> {
        self.call(|reply| Request::Status { reply })
    }

    /// Whether a run is in flight. Fails once the supervisor has stopped.
    pub fn is_running(&self) -> Result<bool> {
        self.status().map(|s| s.running)
    }

    /// Stop the supervisor, waiting for an in-flight run to finish.
    pub fn shutdown(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = self.requests.send(Request::Shutdown);
            if handle.join().is_err() {
                tracing::error!(index = %self.name, "reindexer supervisor panicked");
            }
        }
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = bounded(1);
        self.requests
            .send(make(reply))
            .map_err(|_| IndexError::Reindex(format!("reindexer for '{}' has stopped", self.name)))?;
        rx.recv()
            .map_err(|_| IndexError::Reindex(format!("reindexer for '{}' has stopped", self.name)))
    }
}

impl Drop for OnlineReindexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Supervisor {
    def: Arc<IndexDefinition>,
    old_version: u32,
    new_version: u32,
    listeners: UpgradeListeners,
    worker: Option<JoinHandle<()>>,
    done_tx: Sender<RunOutcome>,
}

impl Supervisor {
    fn run(mut self, requests: Receiver<Request>, done: Receiver<RunOutcome>) {
        loop {
            select! {
                recv(requests) -> msg => match msg {
                    Ok(Request::Start { conflict, only_if_behind, reply }) => {
                        let _ = reply.send(self.handle_start(conflict, only_if_behind));
                    }
                    Ok(Request::Activate { only_if_behind, reply }) => {
                        let _ = reply.send(self.handle_activate(only_if_behind));
                    }
                    Ok(Request::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Ok(Request::Shutdown) | Err(_) => {
                        if self.worker.is_some() {
                            if let Ok(outcome) = done.recv() {
                                self.finish_run(outcome);
                            }
                        }
                        break;
                    }
                },
                recv(done) -> msg => {
                    if let Ok(outcome) = msg {
                        self.finish_run(outcome);
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.def.name()
    }

    fn status(&self) -> ReindexerStatus {
        ReindexerStatus {
            name: self.name().to_string(),
            old_version: self.old_version,
            new_version: self.new_version,
            running: self.worker.is_some(),
        }
    }

    fn is_latest(&self) -> bool {
        self.def.collection().search_version() == Some(self.new_version)
    }

    fn handle_start(&mut self, conflict: Conflict, only_if_behind: bool) -> Result<bool> {
        if self.worker.is_some() {
            return match conflict {
                Conflict::Ignore => Ok(false),
                Conflict::Reject => Err(IndexError::ReindexerAlreadyRunning(self.name().to_string())),
            };
        }
        if only_if_behind && self.is_latest() {
            return Ok(false);
        }

        let def = Arc::clone(&self.def);
        let listeners = self.listeners.clone();
        let done = self.done_tx.clone();
        let (old_version, new_version) = (self.old_version, self.new_version);

        let worker = thread::Builder::new()
            .name(format!("Reindex {} v{}-v{}", self.name(), old_version, new_version))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    reindex(&def, &listeners, old_version, new_version)
                }));
                let outcome = match outcome {
                    Ok(Ok(result)) => RunOutcome::Completed(result),
                    Ok(Err(e)) => RunOutcome::Failed(e),
                    Err(payload) => RunOutcome::Panicked(panic_message(payload)),
                };
                let _ = done.send(outcome);
            })?;

        self.worker = Some(worker);
        Ok(true)
    }

    fn handle_activate(&mut self, only_if_behind: bool) -> Result<bool> {
        if self.worker.is_some() {
            return Err(IndexError::ReindexerAlreadyRunning(self.name().to_string()));
        }
        if only_if_behind && self.is_latest() {
            return Ok(false);
        }
        self.activate_index()?;
        Ok(true)
    }

    fn finish_run(&mut self, outcome: RunOutcome) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let (name, old_version, new_version) = (self.name().to_string(), self.old_version, self.new_version);

        match outcome {
            RunOutcome::Completed(result) if result.success() => match self.activate_index() {
                Ok(()) => {
                    tracing::info!(
                        index = %name,
                        old_version,
                        new_version,
                        done = result.done_count(),
                        elapsed_ms = result.elapsed().as_millis() as u64,
                        "online reindex complete"
                    );
                    self.listeners.notify_success(&name, old_version, new_version);
                }
                Err(e) => {
                    tracing::error!(index = %name, new_version, error = %e, "failed to activate reindexed index");
                    self.listeners.notify_failure(&name, old_version, new_version);
                }
            },
            RunOutcome::Completed(result) => {
                tracing::warn!(
                    index = %name,
                    old_version,
                    new_version,
                    done = result.done_count(),
                    failed = result.failed_count(),
                    "online reindex failed; searches stay on the old version"
                );
                self.listeners.notify_failure(&name, old_version, new_version);
            }
            RunOutcome::Failed(e) => {
                tracing::error!(index = %name, old_version, new_version, error = %e, "online reindex aborted");
                self.listeners.notify_failure(&name, old_version, new_version);
            }
            RunOutcome::Panicked(message) => {
                tracing::error!(index = %name, old_version, new_version, panic = %message, "online reindex panicked");
                self.listeners.notify_failure(&name, old_version, new_version);
            }
        }
    }

    fn activate_index(&mut self) -> Result<()> {
        let collection = Arc::clone(self.def.collection());
        let index = collection
            .write_index(self.new_version)
            .ok_or_else(|| IndexError::MissingWriteIndex {
                name: self.name().to_string(),
                version: self.new_version,
            })?;

        collection.set_search_index(Arc::clone(&index));
        tracing::info!(index = self.name(), version = self.new_version, "using schema version");
        if let Err(e) = index.mark_ready(true) {
            tracing::warn!(index = self.name(), version = self.new_version, error = %e, "error activating new schema version");
        }

        for stale in collection.write_indexes() {
            let version = stale.version();
            if version == self.new_version {
                continue;
            }
            if let Err(e) = stale.mark_ready(false) {
                tracing::warn!(index = self.name(), version, error = %e, "error marking old schema version not ready");
                continue;
            }
            if let Err(e) = collection.remove_write_index(version) {
                tracing::warn!(index = self.name(), version, error = %e, "error removing old write index");
            }
        }

        // Searches now run on the target; later runs must rebuild it in place.
        self.old_version = self.new_version;
        Ok(())
    }
}

/// Body of a reindex worker thread.
fn reindex(
    def: &IndexDefinition,
    listeners: &UpgradeListeners,
    old_version: u32,
    new_version: u32,
) -> Result<ReindexResult> {
    let name = def.name();
    listeners.notify_start(name, old_version, new_version);
    tracing::info!(index = name, old_version, new_version, "starting online reindex");

    let index = def
        .collection()
        .write_index(new_version)
        .ok_or_else(|| IndexError::MissingWriteIndex {
            name: name.to_string(),
            version: new_version,
        })?;

    // Never wipe the index queries are served from.
    let serving = def.collection().search_version() == Some(new_version);
    if old_version != new_version && !serving {
        index.delete_all()?;
    }

    let result = def.site_indexer().index_all(&*index, IndexAllOptions::online())?;
    index.flush()?;
    Ok(result)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
