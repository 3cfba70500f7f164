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

//! Fan-out/fan-in scheduling over a pool of [`Worker`]s.
//!
//! A task group counts completions of independent units. Each unit calls
//! [`SchedulerHandle::complete_one`] when it finishes; the call that brings
//! the count to the group's total wakes the scheduler thread. That thread
//! removes every ready group from the map *before* dispatching its
//! continuation to a uniformly random worker, so a continuation can never
//! run twice, and never before the last completion.
//!
//! Like a worker, the scheduler builds its worker pool and group map on its
//! own thread and publishes them. Groups created with a total of zero are
//! ready immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use khora_sync::{affinity, Identity, Publication, Registered, ResumeSlot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::{SchedulerConfig, WorkerConfig};
use crate::worker::{Worker, WorkerHandle};
use crate::RuntimeError;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a task group within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    /// The raw value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// A failed scheduler request.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The group was never created or has already been dispatched.
    #[error("{0} is unknown or has already been dispatched")]
    UnknownGroup(GroupId),
    /// More units reported completion than the group was created with.
    #[error("{group} received more than its {total} expected completions")]
    OverCompleted {
        /// The offending group.
        group: GroupId,
        /// The group's total.
        total: usize,
    },
    /// No worker is attached to run fan-out units on.
    #[error("the scheduler has no workers to run units on")]
    NoWorkers,
    /// The scheduler rejected the request.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

struct TaskGroup {
    total: usize,
    completed: AtomicUsize,
    // Only taken once the group has been removed from the map; the mutex
    // makes the group shareable across the map's readers.
    continuation: Mutex<Option<Continuation>>,
}

impl TaskGroup {
    fn is_ready(&self) -> bool {
        self.completed.load(Ordering::Acquire) == self.total
    }
}

/// In-flight groups, built on the scheduler thread and shared with completers.
struct TaskGroupMap {
    groups: RwLock<HashMap<GroupId, TaskGroup>>,
    next_id: AtomicU64,
}

impl TaskGroupMap {
    fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn insert(&self, total: usize, continuation: Continuation) -> GroupId {
        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let group = TaskGroup {
            total,
            completed: AtomicUsize::new(0),
            continuation: Mutex::new(Some(continuation)),
        };
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, group);
        id
    }

    /// Records one completion. Returns `true` if this call made the group ready.
    fn complete_one(&self, id: GroupId) -> Result<bool, SchedulerError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let group = groups.get(&id).ok_or(SchedulerError::UnknownGroup(id))?;

        // `completed` never exceeds `total`, so a ready group stays visibly ready.
        let total = group.total;
        match group
            .completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                (done < total).then_some(done + 1)
            }) {
            Ok(previous) => Ok(previous + 1 == total),
            Err(_) => Err(SchedulerError::OverCompleted { group: id, total }),
        }
    }

    fn has_ready(&self) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(TaskGroup::is_ready)
    }

    /// Removes every ready group and returns its continuation.
    fn take_ready(&self) -> Vec<(GroupId, Continuation)> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let ready: Vec<GroupId> = groups
            .iter()
            .filter(|(_, group)| group.is_ready())
            .map(|(id, _)| *id)
            .collect();

        ready
            .into_iter()
            .filter_map(|id| {
                let group = groups.remove(&id)?;
                let continuation = group
                    .continuation
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner);
                debug_assert!(continuation.is_some(), "{id} dispatched twice");
                continuation.map(|continuation| (id, continuation))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// What the scheduler thread publishes once it is running.
struct Endpoints {
    groups: Arc<TaskGroupMap>,
    intake: Sender<Worker>,
}

pub(crate) struct SchedulerShared {
    name: String,
    endpoints: Publication<Endpoints>,
    resume: ResumeSlot,
    stop: AtomicBool,
    // Callers between their stop check and their insert or send.
    submitting: AtomicUsize,
    dispatched: AtomicU64,
    workers: RwLock<Vec<WorkerHandle>>,
}

impl SchedulerShared {
    fn stopped_error() -> RuntimeError {
        RuntimeError::Stopped { owner: "scheduler" }
    }

    /// Runs `admit` unless a stop was requested first.
    ///
    /// The scheduler thread waits for every admitted call before its final
    /// pass, so nothing admitted here is lost silently.
    fn admit<R>(&self, admit: impl FnOnce() -> R) -> Result<R, RuntimeError> {
        self.submitting.fetch_add(1, Ordering::SeqCst);
        if self.stop.load(Ordering::SeqCst) {
            self.submitting.fetch_sub(1, Ordering::SeqCst);
            return Err(Self::stopped_error());
        }
        let admitted = admit();
        self.submitting.fetch_sub(1, Ordering::SeqCst);
        Ok(admitted)
    }

    fn create_group(&self, total: usize, continuation: Continuation) -> Result<GroupId, RuntimeError> {
        let id = self.admit(|| self.endpoints.wait().groups.insert(total, continuation))?;
        log::trace!("Scheduler '{}': created {id} with {total} unit(s).", self.name);
        if total == 0 {
            self.resume.notify();
        }
        Ok(id)
    }

    fn complete_one(&self, id: GroupId) -> Result<(), SchedulerError> {
        let endpoints = self
            .endpoints
            .get()
            .ok_or(SchedulerError::UnknownGroup(id))?;

        match endpoints.groups.complete_one(id) {
            Ok(true) => {
                self.resume.notify();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                log::error!("Scheduler '{}': {err}", self.name);
                Err(err)
            }
        }
    }

    fn add_worker(&self, worker: Worker) -> Result<(), RuntimeError> {
        let handle = worker.handle();
        self.admit(|| self.endpoints.wait().intake.send(worker))?
            .map_err(|_| Self::stopped_error())?;
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        self.resume.notify();
        Ok(())
    }

    fn worker_handles(&self) -> Vec<WorkerHandle> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn spawn_workers(&self, count: usize, template: &WorkerConfig) -> Vec<Worker> {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let config = WorkerConfig {
                name: format!("{}-{index}", template.name),
                ..template.clone()
            };
            match Worker::new(config) {
                Ok(worker) => workers.push(worker),
                Err(err) => log::error!("Scheduler '{}': {err}", self.name),
            }
        }

        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(workers.iter().map(Worker::handle));
        workers
    }

    fn dispatch(&self, workers: &[Worker], rng: &mut StdRng, id: GroupId, continuation: Continuation) {
        let count = workers.len();
        let first = rng.random_range(0..count);
        let Some(worker) = (0..count)
            .map(|offset| &workers[(first + offset) % count])
            .find(|worker| !worker.is_stopped())
        else {
            log::error!(
                "Scheduler '{}': no running worker left for {id}; continuation dropped.",
                self.name
            );
            return;
        };

        self.dispatched.fetch_add(1, Ordering::AcqRel);
        match worker.submit_task(continuation) {
            Ok(()) => log::trace!(
                "Scheduler '{}': {id} resumed on '{}'.",
                self.name,
                worker.name()
            ),
            Err(err) => {
                self.dispatched.fetch_sub(1, Ordering::AcqRel);
                log::error!("Scheduler '{}': continuation of {id} lost: {err}", self.name);
            }
        }
    }

    fn run(&self, id: Identity, config: SchedulerConfig) {
        let _affinity = affinity::bind(id);

        let groups = Arc::new(TaskGroupMap::new());
        let (intake, arrivals): (Sender<Worker>, Receiver<Worker>) = crossbeam_channel::unbounded();
        let mut workers = self.spawn_workers(config.worker_count, &config.worker);
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let endpoints = Endpoints {
            groups: Arc::clone(&groups),
            intake,
        };
        if self.endpoints.publish(endpoints).is_err() {
            log::error!("Scheduler '{}': endpoints published twice.", self.name);
            return;
        }
        log::info!(
            "Scheduler '{}' ({id}) started with {} worker(s).",
            self.name,
            workers.len()
        );

        while !self.stop.load(Ordering::SeqCst) {
            workers.extend(arrivals.try_iter());

            let ready = if workers.is_empty() {
                Vec::new()
            } else {
                groups.take_ready()
            };

            if ready.is_empty() {
                let has_workers = !workers.is_empty();
                self.resume.park_unless(|| {
                    self.stop.load(Ordering::SeqCst)
                        || !arrivals.is_empty()
                        || (has_workers && groups.has_ready())
                });
                continue;
            }

            for (group, continuation) in ready {
                self.dispatch(&workers, &mut rng, group, continuation);
            }
        }

        // Requests admitted before the stop still get their final pass.
        while self.submitting.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        workers.extend(arrivals.try_iter());
        if !workers.is_empty() {
            for (group, continuation) in groups.take_ready() {
                self.dispatch(&workers, &mut rng, group, continuation);
            }
        }

        let abandoned = groups.len();
        if abandoned > 0 {
            log::warn!(
                "Scheduler '{}' stopping with {abandoned} undispatched group(s).",
                self.name
            );
        }
        log::info!(
            "Scheduler '{}' ({id}) stopped; joining {} worker(s).",
            self.name,
            workers.len()
        );
    }
}

/// Owns the scheduler thread and, through it, the worker pool.
pub struct Scheduler {
    shared: Registered<SchedulerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts a scheduler that spawns `config.worker_count` workers.
    pub fn new(config: SchedulerConfig) -> Result<Self, RuntimeError> {
        let shared = Registered::new(SchedulerShared {
            name: config.name.clone(),
            endpoints: Publication::new(),
            resume: ResumeSlot::new(),
            stop: AtomicBool::new(false),
            submitting: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            workers: RwLock::new(Vec::new()),
        });
        let id = shared.id();
        let thread_shared = Arc::clone(shared.shared());
        let name = config.name.clone();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || thread_shared.run(id, config))
            .map_err(|source| RuntimeError::Spawn { name, source })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Starts a scheduler without workers; attach them with [`add_worker`](Self::add_worker).
    pub fn without_workers() -> Result<Self, RuntimeError> {
        Self::new(SchedulerConfig {
            worker_count: 0,
            ..Default::default()
        })
    }

    /// Moves an owned worker into the scheduler's pool.
    pub fn add_worker(&self, worker: Worker) -> Result<(), RuntimeError> {
        self.shared.add_worker(worker)
    }

    /// See [`SchedulerHandle::create_group`].
    pub fn create_group<F>(&self, total: usize, continuation: F) -> Result<GroupId, RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.create_group(total, Box::new(continuation))
    }

    /// See [`SchedulerHandle::complete_one`].
    pub fn complete_one(&self, group: GroupId) -> Result<(), SchedulerError> {
        self.shared.complete_one(group)
    }

    /// See [`SchedulerHandle::fan_out`].
    pub fn fan_out<I, U, F>(&self, units: I, continuation: F) -> Result<GroupId, SchedulerError>
    where
        I: IntoIterator<Item = U>,
        U: FnOnce() + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.handle().fan_out(units, continuation)
    }

    /// Wakes the scheduler thread if it is parked.
    pub fn notify(&self) {
        self.shared.resume.notify();
    }

    /// A cloneable endpoint for completers running on other threads.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(self.shared.shared()),
        }
    }

    /// Handles to every worker in the pool.
    pub fn worker_handles(&self) -> Vec<WorkerHandle> {
        self.shared.worker_handles()
    }

    /// Groups created but not yet dispatched.
    pub fn pending_groups(&self) -> usize {
        self.shared
            .endpoints
            .get()
            .map_or(0, |endpoints| endpoints.groups.len())
    }

    /// Continuations handed to workers so far.
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Acquire)
    }

    /// This scheduler's registry identity.
    pub fn id(&self) -> Identity {
        self.shared.id()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.resume.notify();

        let Some(thread) = self.thread.take() else {
            return;
        };
        // The scheduler thread joins its workers, so a pool worker must not
        // join the scheduler thread in turn.
        let on_own_threads = affinity::current().is_some_and(|current| {
            current == self.shared.id()
                || self
                    .shared
                    .worker_handles()
                    .iter()
                    .any(|worker| worker.id() == current)
        });
        if on_own_threads {
            log::warn!(
                "Scheduler '{}' dropped from one of its own threads; detaching.",
                self.shared.name
            );
            return;
        }
        if thread.join().is_err() {
            log::error!("Scheduler '{}' thread panicked.", self.shared.name);
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.shared.id())
            .field("name", &self.shared.name)
            .field("pending_groups", &self.pending_groups())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

/// A cloneable endpoint to a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl SchedulerHandle {
    /// Registers a group of `total` units whose `continuation` runs on a
    /// worker once all of them have completed.
    pub fn create_group<F>(&self, total: usize, continuation: F) -> Result<GroupId, RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.create_group(total, Box::new(continuation))
    }

    /// Records the completion of one unit of `group`.
    pub fn complete_one(&self, group: GroupId) -> Result<(), SchedulerError> {
        self.shared.complete_one(group)
    }

    /// Runs every unit on a random worker and `continuation` once all of
    /// them have returned (or panicked).
    pub fn fan_out<I, U, F>(&self, units: I, continuation: F) -> Result<GroupId, SchedulerError>
    where
        I: IntoIterator<Item = U>,
        U: FnOnce() + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let units: Vec<U> = units.into_iter().collect();
        // The initial pool is listed before the scheduler publishes its endpoints.
        self.shared.endpoints.wait();
        let workers = self.shared.worker_handles();
        if workers.is_empty() && !units.is_empty() {
            return Err(SchedulerError::NoWorkers);
        }

        let group = self.shared.create_group(units.len(), Box::new(continuation))?;
        let mut rng = rand::rng();
        for unit in units {
            let completion = UnitCompletion {
                scheduler: self.clone(),
                group,
            };
            let worker = &workers[rng.random_range(0..workers.len())];
            if let Err(err) = worker.submit_task(move || {
                let _completion = completion;
                unit();
            }) {
                // The dropped task already reported its completion.
                log::warn!("Scheduler '{}': unit of {group} rejected: {err}", self.shared.name);
            }
        }
        Ok(group)
    }

    /// Wakes the scheduler thread if it is parked.
    pub fn notify(&self) {
        self.shared.resume.notify();
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.shared.name)
            .finish()
    }
}

/// Reports a unit's completion when dropped, including during unwinding.
struct UnitCompletion {
    scheduler: SchedulerHandle,
    group: GroupId,
}

impl Drop for UnitCompletion {
    fn drop(&mut self) {
        let _ = self.scheduler.complete_one(self.group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn scheduler_with(workers: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            name: "scheduler-test".to_string(),
            worker_count: workers,
            seed: Some(42),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_continuation_waits_for_every_unit() {
        init_logging();
        let scheduler = scheduler_with(2);
        let (tx, rx) = crossbeam_channel::unbounded();

        let group = scheduler
            .create_group(3, move || tx.send("resumed").unwrap())
            .unwrap();

        scheduler.complete_one(group).unwrap();
        scheduler.complete_one(group).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(scheduler.pending_groups(), 1);

        scheduler.complete_one(group).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "resumed");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_zero_sized_group_dispatches_immediately() {
        init_logging();
        let scheduler = scheduler_with(1);
        let (tx, rx) = crossbeam_channel::unbounded();

        let group = scheduler.create_group(0, move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());

        // Already dispatched, so further completions are rejected.
        assert!(matches!(
            scheduler.complete_one(group),
            Err(SchedulerError::UnknownGroup(id)) if id == group
        ));
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        init_logging();
        let scheduler = scheduler_with(1);
        assert!(matches!(
            scheduler.complete_one(GroupId(999)),
            Err(SchedulerError::UnknownGroup(_))
        ));
    }

    #[test]
    fn test_over_completion_is_rejected_before_dispatch() {
        init_logging();
        // No workers: ready groups stay in the map.
        let scheduler = Scheduler::without_workers().unwrap();
        let group = scheduler.create_group(1, || {}).unwrap();

        scheduler.complete_one(group).unwrap();
        assert!(matches!(
            scheduler.complete_one(group),
            Err(SchedulerError::OverCompleted { total: 1, .. })
        ));
        assert_eq!(scheduler.pending_groups(), 1);
    }

    #[test]
    fn test_ready_groups_wait_for_first_worker() {
        init_logging();
        let scheduler = Scheduler::without_workers().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let group = scheduler.create_group(1, move || tx.send(()).unwrap()).unwrap();
        scheduler.complete_one(group).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        scheduler
            .add_worker(Worker::new(WorkerConfig::named("late-worker")).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(scheduler.worker_handles().len(), 1);
        assert_eq!(scheduler.dispatched(), 1);
    }

    #[test]
    fn test_fan_out_runs_units_then_continuation() {
        init_logging();
        let scheduler = scheduler_with(3);
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();

        let units: Vec<_> = (0..20)
            .map(|_| {
                let done = Arc::clone(&done);
                move || {
                    done.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();

        let observed = Arc::clone(&done);
        scheduler
            .fan_out(units, move || {
                tx.send(observed.load(Ordering::SeqCst)).unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 20);
    }

    #[test]
    fn test_fan_out_completes_even_if_a_unit_panics() {
        init_logging();
        let scheduler = scheduler_with(2);
        let (tx, rx) = crossbeam_channel::unbounded();

        let units: Vec<Box<dyn FnOnce() + Send>> = vec![
            Box::new(|| {}),
            Box::new(|| panic!("unit failed")),
            Box::new(|| {}),
        ];
        scheduler.fan_out(units, move || tx.send(()).unwrap()).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_fan_out_without_workers_is_rejected() {
        init_logging();
        let scheduler = Scheduler::without_workers().unwrap();
        assert!(matches!(
            scheduler.fan_out(vec![|| {}], || {}),
            Err(SchedulerError::NoWorkers)
        ));
    }

    #[test]
    fn test_handle_rejects_after_scheduler_dropped() {
        init_logging();
        let scheduler = scheduler_with(1);
        let handle = scheduler.handle();
        drop(scheduler);

        assert!(matches!(
            handle.create_group(1, || {}),
            Err(RuntimeError::Stopped { .. })
        ));
    }

    #[test]
    fn test_over_completion_never_hides_a_ready_group() {
        let groups = Arc::new(TaskGroupMap::new());
        let group = groups.insert(1, Box::new(|| {}));
        assert!(groups.complete_one(group).unwrap());

        let completers: Vec<_> = (0..4)
            .map(|_| {
                let groups = Arc::clone(&groups);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        assert!(groups.complete_one(group).is_err());
                    }
                })
            })
            .collect();

        while !completers.iter().all(|completer| completer.is_finished()) {
            assert!(groups.has_ready(), "ready group reported as not ready");
        }
        for completer in completers {
            completer.join().expect("completer panicked");
        }
        assert_eq!(groups.take_ready().len(), 1);
    }

    #[test]
    fn test_drop_from_continuation_detaches() {
        init_logging();
        let slot = Arc::new(Mutex::new(Some(scheduler_with(2))));
        let (tx, rx) = crossbeam_channel::unbounded();

        let owner = Arc::clone(&slot);
        slot.lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .create_group(0, move || {
                let scheduler = owner.lock().unwrap().take();
                drop(scheduler);
                tx.send(()).unwrap();
            })
            .unwrap();

        assert!(
            rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "dropping the scheduler from its continuation deadlocked"
        );
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn test_groups_accepted_during_shutdown_still_run() {
        init_logging();
        let scheduler = scheduler_with(2);
        let accepted = Arc::new(AtomicUsize::new(0));
        let resumed = Arc::new(AtomicUsize::new(0));

        let creators: Vec<_> = (0..4)
            .map(|_| {
                let handle = scheduler.handle();
                let accepted = Arc::clone(&accepted);
                let resumed = Arc::clone(&resumed);
                thread::spawn(move || loop {
                    let resumed = Arc::clone(&resumed);
                    match handle.create_group(0, move || {
                        resumed.fetch_add(1, Ordering::SeqCst);
                    }) {
                        Ok(_) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            assert!(err.is_stopped());
                            break;
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        drop(scheduler);
        for creator in creators {
            creator.join().expect("creator panicked");
        }

        assert!(accepted.load(Ordering::SeqCst) > 0);
        assert_eq!(
            resumed.load(Ordering::SeqCst),
            accepted.load(Ordering::SeqCst)
        );
    }
}
