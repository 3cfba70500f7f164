// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A dedicated thread that runs submitted tasks in order.
//!
//! The worker's task queue is created on the worker thread itself and its
//! sending half is published through a [`Publication`]; submitters that
//! arrive before publication wait for it. When the queue is empty the
//! thread arms its [`ResumeSlot`] and parks until [`Worker::notify`].
//!
//! Dropping a [`Worker`] requests a stop, wakes the thread and joins it.
//! Tasks accepted before the stop request still run; later submissions are
//! rejected with [`RuntimeError::Stopped`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use khora_sync::{affinity, Identity, ObjectRegistry, Publication, Registered, ResumeSlot};

use crate::config::WorkerConfig;
use crate::panic::panic_message;
use crate::RuntimeError;

/// A unit of work executed on a worker thread.
pub type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Counters describing what a worker has run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tasks that have finished running, successfully or not.
    pub executed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
}

pub(crate) struct WorkerShared {
    name: String,
    queue: Publication<Sender<Task>>,
    resume: ResumeSlot,
    stop: AtomicBool,
    // Submitters between their stop check and their push.
    submitting: AtomicUsize,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerShared {
    fn new(name: String) -> Self {
        Self {
            name,
            queue: Publication::new(),
            resume: ResumeSlot::new(),
            stop: AtomicBool::new(false),
            submitting: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn submit(&self, task: Task) -> Result<(), RuntimeError> {
        const STOPPED: RuntimeError = RuntimeError::Stopped { owner: "worker" };

        self.submitting.fetch_add(1, Ordering::SeqCst);
        if self.stop.load(Ordering::SeqCst) {
            self.submitting.fetch_sub(1, Ordering::SeqCst);
            log::warn!("Worker '{}': rejected a task submitted after stop.", self.name);
            return Err(STOPPED);
        }

        let sent = self.queue.wait().send(task);
        self.submitting.fetch_sub(1, Ordering::SeqCst);
        sent.map_err(|_| STOPPED)?;

        self.resume.notify();
        Ok(())
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.resume.notify();
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            executed: self.executed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }

    fn execute(&self, task: Task) {
        let failed = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                log::error!("Worker '{}': task failed: {err:#}", self.name);
                true
            }
            Err(payload) => {
                log::error!(
                    "Worker '{}': task panicked: {}",
                    self.name,
                    panic_message(&*payload)
                );
                true
            }
        };

        if failed {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.executed.fetch_add(1, Ordering::AcqRel);
    }

    fn run(&self, id: Identity) {
        let _affinity = affinity::bind(id);

        let (sender, tasks): (Sender<Task>, Receiver<Task>) = crossbeam_channel::unbounded();
        if self.queue.publish(sender).is_err() {
            log::error!("Worker '{}': task queue published twice.", self.name);
            return;
        }
        log::debug!("Worker '{}' ({id}) started.", self.name);

        while !self.stop.load(Ordering::SeqCst) {
            match tasks.try_recv() {
                Ok(task) => self.execute(task),
                Err(_) => self
                    .resume
                    .park_unless(|| !tasks.is_empty() || self.stop.load(Ordering::SeqCst)),
            }
        }

        // Let submitters that passed the stop check finish their push, then
        // run everything that was accepted.
        while self.submitting.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        let mut drained = 0usize;
        while let Ok(task) = tasks.try_recv() {
            self.execute(task);
            drained += 1;
        }

        log::debug!(
            "Worker '{}' ({id}) stopped after draining {drained} task(s).",
            self.name
        );
    }
}

/// An owned worker thread.
///
/// `Worker` is movable; moving it never affects the running thread.
pub struct Worker {
    shared: Registered<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread.
    pub fn new(config: WorkerConfig) -> Result<Self, RuntimeError> {
        let shared = Registered::new(WorkerShared::new(config.name.clone()));
        let id = shared.id();
        let thread_shared = Arc::clone(shared.shared());

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let thread = builder
            .spawn(move || thread_shared.run(id))
            .map_err(|source| RuntimeError::Spawn {
                name: config.name,
                source,
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Queues `task` for execution on the worker thread.
    ///
    /// Blocks only until the worker's queue has been published, never for
    /// the task itself.
    pub fn submit_task<F>(&self, task: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(move || {
            task();
            Ok(())
        }))
    }

    /// Queues a task whose error is logged and counted instead of propagated.
    pub fn submit_fallible<F>(&self, task: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.shared.submit(Box::new(task))
    }

    /// Wakes the worker thread if it is parked.
    pub fn notify(&self) {
        self.shared.resume.notify();
    }

    /// Asks the thread to finish its accepted tasks and exit.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// A cloneable endpoint to this worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.shared.id(),
            shared: Arc::clone(self.shared.shared()),
        }
    }

    /// This worker's registry identity.
    pub fn id(&self) -> Identity {
        self.shared.id()
    }

    /// The worker thread's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Execution counters.
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }

    /// The worker whose thread is running the caller, if any.
    ///
    /// Lets a task submit follow-up work to its own worker.
    pub fn current() -> Option<WorkerHandle> {
        let id = affinity::current()?;
        let shared = ObjectRegistry::global().query::<WorkerShared>(id)?;
        Some(WorkerHandle { id, shared })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.request_stop();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if affinity::is_bound_to(self.shared.id()) {
            log::warn!(
                "Worker '{}' dropped from its own thread; detaching instead of joining.",
                self.shared.name
            );
            return;
        }
        if thread.join().is_err() {
            log::error!("Worker '{}' thread panicked.", self.shared.name);
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.shared.id())
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A cloneable endpoint to a [`Worker`].
///
/// Handles may outlive their worker; submissions then fail with
/// [`RuntimeError::Stopped`].
#[derive(Clone)]
pub struct WorkerHandle {
    id: Identity,
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    /// See [`Worker::submit_task`].
    pub fn submit_task<F>(&self, task: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(move || {
            task();
            Ok(())
        }))
    }

    /// See [`Worker::submit_fallible`].
    pub fn submit_fallible<F>(&self, task: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.shared.submit(Box::new(task))
    }

    /// See [`Worker::notify`].
    pub fn notify(&self) {
        self.shared.resume.notify();
    }

    /// Returns `true` once the worker has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// The worker's registry identity.
    pub fn id(&self) -> Identity {
        self.id
    }

    /// The worker thread's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Execution counters.
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached within a second");
    }

    #[test]
    fn test_tasks_run_in_submission_order() {
        init_logging();
        let worker = Worker::new(WorkerConfig::named("order-test")).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..100 {
            let order = Arc::clone(&order);
            worker
                .submit_task(move || order.lock().unwrap().push(index))
                .unwrap();
        }
        drop(worker);

        assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_stop_is_rejected() {
        init_logging();
        let worker = Worker::new(WorkerConfig::default()).unwrap();
        worker.request_stop();
        assert!(worker.is_stopped());

        let err = worker.submit_task(|| {}).unwrap_err();
        assert!(err.is_stopped());
    }

    #[test]
    fn test_handle_outliving_worker_is_rejected() {
        init_logging();
        let worker = Worker::new(WorkerConfig::default()).unwrap();
        let handle = worker.handle();
        assert_eq!(handle.id(), worker.id());
        drop(worker);

        assert!(handle.is_stopped());
        assert!(handle.submit_task(|| {}).unwrap_err().is_stopped());
    }

    #[test]
    fn test_failing_tasks_are_counted_and_worker_survives() {
        init_logging();
        let worker = Worker::new(WorkerConfig::named("failure-test")).unwrap();

        worker
            .submit_fallible(|| Err(anyhow::anyhow!("shader cache unavailable")))
            .unwrap();
        worker.submit_task(|| panic!("task blew up")).unwrap();
        worker.submit_task(|| {}).unwrap();

        wait_for(|| worker.stats().executed == 3);
        assert_eq!(
            worker.stats(),
            WorkerStats {
                executed: 3,
                failed: 2
            }
        );
    }

    #[test]
    fn test_moved_worker_keeps_running() {
        init_logging();
        let worker = Worker::new(WorkerConfig::default()).unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        let moved = Box::new(worker);
        let moved_again = thread::spawn(move || *moved).join().unwrap();

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            moved_again
                .submit_task(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        drop(moved_again);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_current_resolves_inside_tasks_only() {
        init_logging();
        assert!(Worker::current().is_none());

        let worker = Worker::new(WorkerConfig::default()).unwrap();
        let expected = worker.id();
        let (tx, rx) = crossbeam_channel::bounded(1);
        worker
            .submit_task(move || {
                let current = Worker::current().map(|handle| handle.id());
                let _ = tx.send(current);
            })
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(expected)
        );
    }

    #[test]
    fn test_task_can_resubmit_to_its_own_worker() {
        init_logging();
        let worker = Worker::new(WorkerConfig::default()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        worker
            .submit_task(move || {
                if let Some(me) = Worker::current() {
                    let _ = me.submit_task(move || {
                        let _ = tx.send("follow-up ran");
                    });
                }
            })
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "follow-up ran"
        );
    }

    #[test]
    fn test_idle_worker_wakes_for_late_submission() {
        init_logging();
        let worker = Worker::new(WorkerConfig::default()).unwrap();
        thread::sleep(Duration::from_millis(20));

        let (tx, rx) = crossbeam_channel::bounded(1);
        worker.submit_task(move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        worker.notify();
    }
}
