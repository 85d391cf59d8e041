// Copyright 2025 The Chronod Authors
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

//! Delayed-task scheduling on a fixed worker pool.
//!
//! [`Scheduler`] runs one-shot and recurring tasks on a configurable number
//! of worker threads, supports blocking and non-blocking cancellation, and
//! takes an injectable [`Clock`] so tests can drive it deterministically.
//!
//! Tasks live in a table keyed by handle; the due-time priority queue is a
//! binary min-heap of handles whose sift operations write each task's heap
//! index back into the table, giving O(log n) in-place cancellation.

use std::cell::Cell;
use std::cmp;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use crate::clock::{Clock, RealClock};
use crate::sequence::SequenceNumber;
use crate::status::{Result, Status};
use crate::sync::{lock, wait, wait_timeout};

/// Unique id of a scheduled task.
pub type Handle = u64;

/// Sentinel value never assigned to a real task.
pub const INVALID_HANDLE: Handle = 0;

/// Worker count of the process-wide [`default_scheduler`].
pub const DEFAULT_BACKGROUND_WORKERS: u16 = 10;

/// Type of the callbacks that can be scheduled.
pub type Callback = Box<dyn FnMut() + Send>;

static HANDLE_GENERATOR: SequenceNumber = SequenceNumber::new(1);

thread_local! {
    static CURRENT_TASK: Cell<Handle> = const { Cell::new(INVALID_HANDLE) };
}

/// Returns the handle of the task the calling thread is currently running,
/// or [`INVALID_HANDLE`] if the caller is not a scheduler worker.
pub fn current_task_handle() -> Handle {
    CURRENT_TASK.with(Cell::get)
}

/// Returns the lazily-started process-wide scheduler (real clock,
/// [`DEFAULT_BACKGROUND_WORKERS`] workers). Socket timeouts run here.
pub fn default_scheduler() -> &'static Scheduler {
    static DEFAULT: OnceLock<Scheduler> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        Scheduler::new(Options {
            num_workers: DEFAULT_BACKGROUND_WORKERS,
            clock: None,
            start_now: true,
        })
    })
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// The number of worker threads. Must be > 0. Each worker is a system
    /// thread, so keep this reasonable.
    pub num_workers: u16,

    /// Clock used to schedule actions. `None` means the real clock.
    pub clock: Option<Arc<dyn Clock>>,

    /// If true the constructor calls [`Scheduler::start`] right away. Leave
    /// false for schedulers instantiated in global scope so they don't spin
    /// up threads during initialization.
    pub start_now: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_workers: 2,
            clock: None,
            start_now: false,
        }
    }
}

/// States of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Constructed but not yet started.
    Idle,
    /// The worker threads are processing tasks.
    Started,
    /// Waiting for in-flight tasks to finish; no further task will run.
    Stopping,
    /// All workers joined; no further task will run.
    Stopped,
}

struct Task {
    callback: Option<Callback>,
    due: Duration,
    period: Option<Duration>,
    cancelled: bool,
    // Index of this task in the heap, None while a worker runs it.
    heap_index: Option<usize>,
}

struct Core {
    state: State,
    tasks: HashMap<Handle, Task>,
    queue: Vec<Handle>,
    workers: Vec<thread::JoinHandle<()>>,
    sleeping: Vec<bool>,
}

struct Shared {
    clock: Arc<dyn Clock>,
    num_workers: u16,
    core: Mutex<Core>,
    wakeup: Condvar,
}

/// Manages the scheduling of generic runnable tasks. Supports blocking and
/// non-blocking cancellation as well as recurring tasks that are
/// automatically rescheduled after every run.
///
/// Fully thread-safe. The destructor stops the scheduler, joining all
/// workers.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler from `options`.
    ///
    /// Panics if `options.num_workers` is zero.
    pub fn new(options: Options) -> Self {
        assert!(
            options.num_workers > 0,
            "scheduler needs at least 1 worker thread"
        );
        let clock: Arc<dyn Clock> = match options.clock {
            Some(clock) => clock,
            None => Arc::new(StaticClock(RealClock::get())),
        };
        let shared = Arc::new(Shared {
            clock: Arc::clone(&clock),
            num_workers: options.num_workers,
            core: Mutex::new(Core {
                state: State::Idle,
                tasks: HashMap::new(),
                queue: Vec::new(),
                workers: Vec::new(),
                sleeping: Vec::new(),
            }),
            wakeup: Condvar::new(),
        });
        // Deadline sleeps re-check the clock under the core mutex; the
        // waker takes that mutex before signalling so a time jump cannot
        // slip between a sleeper's check and its wait.
        let watched = Arc::downgrade(&shared);
        clock.watch(Box::new(move || {
            if let Some(shared) = watched.upgrade() {
                drop(lock(&shared.core));
                shared.wakeup.notify_all();
            }
        }));
        let scheduler = Self { shared };
        if options.start_now {
            scheduler.start();
        }
        scheduler
    }

    /// Returns the clock this scheduler runs on.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        lock(&self.shared.core).state
    }

    /// Starts the workers. Has no effect unless the scheduler is [`State::Idle`].
    /// The scheduler is guaranteed to be [`State::Started`] when this returns.
    pub fn start(&self) {
        let mut core = lock(&self.shared.core);
        if core.state != State::Idle {
            return;
        }
        let num_workers = self.shared.num_workers as usize;
        core.sleeping = vec![false; num_workers];
        core.workers.reserve(num_workers);
        for index in 0..num_workers {
            let shared = Arc::clone(&self.shared);
            let worker = thread::Builder::new()
                .name(format!("sched-worker-{index}"))
                .spawn(move || shared.worker_loop(index))
                .expect("failed to spawn scheduler worker");
            core.workers.push(worker);
        }
        core.state = State::Started;
    }

    /// Stops and joins all workers.
    ///
    /// The scheduler passes through [`State::Stopping`] while in-flight
    /// callbacks finish and is guaranteed to be [`State::Stopped`] on
    /// return, even if it had never been started. Concurrent calls all block
    /// until the workers are joined.
    pub fn stop(&self) {
        let workers = {
            let mut core = lock(&self.shared.core);
            if core.state < State::Started {
                core.state = State::Stopped;
                self.shared.wakeup.notify_all();
                return;
            }
            if core.state > State::Started {
                while core.state != State::Stopped {
                    core = wait(&self.shared.wakeup, core);
                }
                return;
            }
            core.state = State::Stopping;
            self.shared.wakeup.notify_all();
            mem::take(&mut core.workers)
        };
        for worker in workers {
            let _ = worker.join();
        }
        let mut core = lock(&self.shared.core);
        core.queue.clear();
        core.tasks.clear();
        core.state = State::Stopped;
        self.shared.wakeup.notify_all();
    }

    /// Schedules a task to be executed as soon as possible.
    pub fn schedule_now(&self, callback: impl FnMut() + Send + 'static) -> Handle {
        let due = self.shared.clock.now();
        self.shared.schedule(Box::new(callback), due, None)
    }

    /// Schedules a task to be executed at `due` (in the scheduler clock's
    /// epoch).
    pub fn schedule_at(&self, callback: impl FnMut() + Send + 'static, due: Duration) -> Handle {
        self.shared.schedule(Box::new(callback), due, None)
    }

    /// Schedules a task to be executed at now + `delay`.
    pub fn schedule_in(&self, callback: impl FnMut() + Send + 'static, delay: Duration) -> Handle {
        let due = self.shared.clock.now() + delay;
        self.shared.schedule(Box::new(callback), due, None)
    }

    /// Schedules a recurring task to be executed once every `period`,
    /// starting as soon as possible.
    pub fn schedule_recurring(
        &self,
        callback: impl FnMut() + Send + 'static,
        period: Duration,
    ) -> Handle {
        let due = self.shared.clock.now();
        self.shared.schedule(Box::new(callback), due, Some(period))
    }

    /// Schedules a recurring task to be executed once every `period`,
    /// starting at `due`.
    pub fn schedule_recurring_at(
        &self,
        callback: impl FnMut() + Send + 'static,
        due: Duration,
        period: Duration,
    ) -> Handle {
        self.shared.schedule(Box::new(callback), due, Some(period))
    }

    /// Schedules a recurring task to be executed once every `period`,
    /// starting at now + `delay`.
    pub fn schedule_recurring_in(
        &self,
        callback: impl FnMut() + Send + 'static,
        delay: Duration,
        period: Duration,
    ) -> Handle {
        let due = self.shared.clock.now() + delay;
        self.shared.schedule(Box::new(callback), due, Some(period))
    }

    /// Like [`schedule_in`](Scheduler::schedule_in) but returns a
    /// [`ScopedHandle`] that blocking-cancels the task when dropped.
    pub fn schedule_scoped_in(
        &self,
        callback: impl FnMut() + Send + 'static,
        delay: Duration,
    ) -> ScopedHandle<'_> {
        ScopedHandle {
            scheduler: Some(self),
            handle: self.schedule_in(callback, delay),
        }
    }

    /// Like [`schedule_at`](Scheduler::schedule_at) but returns a
    /// [`ScopedHandle`].
    pub fn schedule_scoped_at(
        &self,
        callback: impl FnMut() + Send + 'static,
        due: Duration,
    ) -> ScopedHandle<'_> {
        ScopedHandle {
            scheduler: Some(self),
            handle: self.schedule_at(callback, due),
        }
    }

    /// Like [`schedule_recurring_in`](Scheduler::schedule_recurring_in) but
    /// returns a [`ScopedHandle`].
    pub fn schedule_scoped_recurring_in(
        &self,
        callback: impl FnMut() + Send + 'static,
        delay: Duration,
        period: Duration,
    ) -> ScopedHandle<'_> {
        ScopedHandle {
            scheduler: Some(self),
            handle: self.schedule_recurring_in(callback, delay, period),
        }
    }

    /// Cancels the task with the given handle without blocking.
    ///
    /// Returns true iff the task was still in the queue and will not run. A
    /// task that has already started finishes normally (and, if recurring,
    /// is not rescheduled); in that case this returns false immediately.
    pub fn cancel(&self, handle: Handle) -> bool {
        self.shared.cancel(handle, false)
    }

    /// Like [`cancel`](Scheduler::cancel), but if the task has already
    /// started this blocks until the run finishes and the task is erased.
    ///
    /// Calling this from inside the task itself deadlocks; the contract
    /// forbids it.
    pub fn blocking_cancel(&self, handle: Handle) -> bool {
        self.shared.cancel(handle, true)
    }

    /// TEST ONLY: blocks until every worker is asleep and the queue is empty
    /// or its head is in the future.
    ///
    /// Only meaningful with a [`crate::clock::MockClock`], whose time cannot
    /// move underneath the check. Returns an error if the scheduler stops
    /// while waiting.
    pub fn wait_until_workers_idle(&self) -> Result<()> {
        let now = self.shared.clock.now();
        let mut core = lock(&self.shared.core);
        loop {
            let idle = core.state != State::Started
                || (core.sleeping.iter().all(|sleeping| *sleeping)
                    && (core.queue.is_empty() || core.tasks[&core.queue[0]].due > now));
            if idle {
                break;
            }
            core = wait(&self.shared.wakeup, core);
        }
        if core.state > State::Started {
            Err(Status::cancelled("scheduler stopped"))
        } else {
            Ok(())
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = lock(&self.shared.core);
        f.debug_struct("Scheduler")
            .field("state", &core.state)
            .field("num_workers", &self.shared.num_workers)
            .field("tasks", &core.tasks.len())
            .finish()
    }
}

// Adapter so a &'static RealClock can live behind Arc<dyn Clock>.
#[derive(Debug)]
struct StaticClock(&'static RealClock);

impl Clock for StaticClock {
    fn now(&self) -> Duration {
        self.0.now()
    }
}

/// Scoped wrapper around a task handle. Blocking cancellation of the task is
/// performed automatically on drop; it's a no-op if the task has already run
/// or has already been cancelled.
///
/// A `ScopedHandle` may be empty, in which case it does nothing.
pub struct ScopedHandle<'a> {
    scheduler: Option<&'a Scheduler>,
    handle: Handle,
}

impl<'a> ScopedHandle<'a> {
    /// Creates an empty handle.
    pub fn empty() -> Self {
        Self {
            scheduler: None,
            handle: INVALID_HANDLE,
        }
    }

    /// Returns true iff this handle manages no task.
    pub fn is_empty(&self) -> bool {
        self.scheduler.is_none()
    }

    /// Returns the scheduler the task was scheduled on, if any.
    pub fn parent(&self) -> Option<&'a Scheduler> {
        self.scheduler
    }

    /// Returns the wrapped task handle ([`INVALID_HANDLE`] if empty).
    pub fn value(&self) -> Handle {
        self.handle
    }

    /// Releases ownership of the wrapped handle and returns it, leaving this
    /// object empty.
    pub fn release(&mut self) -> Handle {
        self.scheduler = None;
        mem::replace(&mut self.handle, INVALID_HANDLE)
    }

    /// Non-blocking cancellation of the managed task; empties this handle.
    pub fn cancel(&mut self) -> bool {
        match self.scheduler.take() {
            Some(scheduler) => scheduler.cancel(self.release()),
            None => false,
        }
    }

    /// Blocking cancellation of the managed task; empties this handle.
    /// Usually unnecessary because drop does it for you.
    ///
    /// Calling this from inside the managed task deadlocks.
    pub fn blocking_cancel(&mut self) -> bool {
        match self.scheduler.take() {
            Some(scheduler) => scheduler.blocking_cancel(self.release()),
            None => false,
        }
    }
}

impl Default for ScopedHandle<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.blocking_cancel(self.handle);
        }
    }
}

impl fmt::Debug for ScopedHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("handle", &self.handle)
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl Shared {
    fn schedule(&self, callback: Callback, due: Duration, period: Option<Duration>) -> Handle {
        let handle = HANDLE_GENERATOR.get_next();
        let mut core = lock(&self.core);
        if core.state > State::Started {
            // Dropped silently: the handle is dead on arrival.
            return handle;
        }
        core.tasks.insert(
            handle,
            Task {
                callback: Some(callback),
                due,
                period,
                cancelled: false,
                heap_index: None,
            },
        );
        core.heap_push(handle);
        self.wakeup.notify_all();
        handle
    }

    fn cancel(&self, handle: Handle, blocking: bool) -> bool {
        let mut core = lock(&self.core);
        let index = match core.tasks.get_mut(&handle) {
            None => return false,
            Some(task) => {
                task.cancelled = true;
                task.heap_index
            }
        };
        match index {
            Some(index) => {
                core.heap_remove(index);
                core.tasks.remove(&handle);
                self.wakeup.notify_all();
                true
            }
            None => {
                if blocking {
                    // The task is being run by a worker; wait for erasure.
                    while core.tasks.contains_key(&handle) {
                        core = wait(&self.wakeup, core);
                    }
                }
                false
            }
        }
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        let mut previous: Option<(Handle, Callback)> = None;
        loop {
            match self.fetch_task(index, previous.take()) {
                None => return,
                Some((handle, mut callback)) => {
                    CURRENT_TASK.with(|current| current.set(handle));
                    callback();
                    CURRENT_TASK.with(|current| current.set(INVALID_HANDLE));
                    previous = Some((handle, callback));
                }
            }
        }
    }

    fn fetch_task(
        &self,
        worker: usize,
        previous: Option<(Handle, Callback)>,
    ) -> Option<(Handle, Callback)> {
        let mut core = lock(&self.core);
        core.sleeping[worker] = true;
        self.wakeup.notify_all();
        let (mut core, result) = self.fetch_task_impl(core, previous);
        core.sleeping[worker] = false;
        result
    }

    fn fetch_task_impl<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
        previous: Option<(Handle, Callback)>,
    ) -> (MutexGuard<'a, Core>, Option<(Handle, Callback)>) {
        if let Some((handle, callback)) = previous {
            let reschedule = match core.tasks.get_mut(&handle) {
                Some(task) if !task.cancelled && task.period.is_some() => {
                    let period = task.period.unwrap_or_default();
                    let elapsed = self.clock.now().saturating_sub(task.due);
                    task.due += cmp::max(ceil_to(elapsed, period), period);
                    task.callback = Some(callback);
                    true
                }
                _ => false,
            };
            if reschedule {
                core.heap_push(handle);
            } else {
                core.tasks.remove(&handle);
            }
            self.wakeup.notify_all();
        }
        loop {
            while core.state <= State::Started && core.queue.is_empty() {
                core = wait(&self.wakeup, core);
            }
            if core.state > State::Started {
                return (core, None);
            }
            let deadline = core.tasks[&core.queue[0]].due;
            loop {
                if core.state > State::Started {
                    return (core, None);
                }
                if !core.queue.is_empty() && core.tasks[&core.queue[0]].due < deadline {
                    // An earlier task arrived; recompute the deadline.
                    break;
                }
                let now = self.clock.now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = wait_timeout(&self.wakeup, core, deadline - now);
                core = guard;
            }
            if core.state > State::Started {
                return (core, None);
            }
            let now = self.clock.now();
            if !core.queue.is_empty() && core.tasks[&core.queue[0]].due <= now {
                let handle = match core.heap_pop() {
                    Some(handle) => handle,
                    None => continue,
                };
                if core.tasks[&handle].cancelled {
                    core.tasks.remove(&handle);
                    self.wakeup.notify_all();
                    continue;
                }
                let callback = core
                    .tasks
                    .get_mut(&handle)
                    .and_then(|task| task.callback.take());
                if let Some(callback) = callback {
                    return (core, Some((handle, callback)));
                }
            }
        }
    }
}

impl Core {
    fn due_of(&self, handle: Handle) -> Duration {
        self.tasks[&handle].due
    }

    fn set_heap_index(&mut self, handle: Handle, index: usize) {
        if let Some(task) = self.tasks.get_mut(&handle) {
            task.heap_index = Some(index);
        }
    }

    fn heap_push(&mut self, handle: Handle) {
        let index = self.queue.len();
        self.queue.push(handle);
        self.set_heap_index(handle, index);
        self.sift_up(index);
    }

    fn heap_pop(&mut self) -> Option<Handle> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.heap_remove(0))
        }
    }

    // Removes the entry at `index` in O(log n), keeping back-indices valid.
    fn heap_remove(&mut self, index: usize) -> Handle {
        let last = self.queue.len() - 1;
        self.queue.swap(index, last);
        let removed = self.queue.pop().expect("heap_remove on empty queue");
        if let Some(task) = self.tasks.get_mut(&removed) {
            task.heap_index = None;
        }
        if index < self.queue.len() {
            let moved = self.queue[index];
            self.set_heap_index(moved, index);
            self.sift_down(index);
            self.sift_up(index);
        }
        removed
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.due_of(self.queue[index]) < self.due_of(self.queue[parent]) {
                self.queue.swap(index, parent);
                self.set_heap_index(self.queue[index], index);
                self.set_heap_index(self.queue[parent], parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            let right = 2 * index + 2;
            let mut smallest = index;
            if left < self.queue.len()
                && self.due_of(self.queue[left]) < self.due_of(self.queue[smallest])
            {
                smallest = left;
            }
            if right < self.queue.len()
                && self.due_of(self.queue[right]) < self.due_of(self.queue[smallest])
            {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.queue.swap(index, smallest);
            self.set_heap_index(self.queue[index], index);
            self.set_heap_index(self.queue[smallest], smallest);
            index = smallest;
        }
    }
}

// Smallest multiple of `period` that is >= `value`.
fn ceil_to(value: Duration, period: Duration) -> Duration {
    if period.is_zero() {
        return value;
    }
    let value = value.as_nanos();
    let period = period.as_nanos();
    let multiples = value.div_ceil(period);
    Duration::from_nanos((multiples * period) as u64)
}
