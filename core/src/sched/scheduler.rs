// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

// cspell:words prereq prereqs EINTR

//! The cooperative scheduler: pending and ready task sets, the dispatch
//! loop, and the registration family.
//!
//! All asynchronous work in the framework is expressed as tasks handed to
//! this scheduler: fd readiness, deadlines, prerequisite edges, and
//! shutdown eligibility. Callbacks run to completion on the scheduler's
//! thread before the next callback begins, so data owned by a task can be
//! mutated from inside its own callback without locks. A long-running
//! callback starves everything else; callbacks split large work themselves
//! by re-scheduling a continuation.

use super::clock::{Deadline, Timeout};
use super::priority::{PRIORITY_COUNT, Priority, Reason};
use super::shutdown_signals::ShutdownSignals;
use super::task::{Task, TaskContext, TaskFn, TaskId};
use crate::net::FdSet;
use crate::net::poll::poll_sets;
use std::fmt;
use std::io;
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

/// Consecutive zero-timeout, zero-readiness iterations tolerated before the
/// loop assumes an application bug is re-scheduling a zero-delay task
/// forever, logs a warning, and throttles.
const BUSY_WAIT_THRESHOLD: u32 = 16;

/// How long the loop sleeps once the busy-wait guard trips.
const BUSY_WAIT_PAUSE: Duration = Duration::from_secs(1);

/// Holds every live task and dispatches them in strict priority order.
///
/// Created internally by [`Scheduler::run`]; callbacks receive `&mut
/// Scheduler` to register follow-up work, cancel tasks, query load, or
/// request shutdown.
pub struct Scheduler {
    /// Tasks waiting on fd readiness, a deadline, or a prerequisite.
    pending: Vec<Task>,
    /// One ready stack per priority band; the [`Priority::Keep`] band at
    /// index 0 must always stay empty.
    ready: [Vec<Task>; PRIORITY_COUNT],
    /// Id of the last task registered; incremented for each registration.
    last_id: u64,
    /// All tasks with smaller ids have left the system. A monotone hint
    /// that short-circuits most prerequisite lookups.
    lowest_pending_id: u64,
    /// Whether shutdown has been requested (by signal or programmatically).
    shutdown: bool,
    /// Number of tasks currently in the ready stacks.
    ready_count: usize,
    /// Number of tasks dispatched so far.
    tasks_run: u64,
    /// Band of the task currently executing; only meaningful while a
    /// callback is running.
    current_priority: Priority,
    /// Whether control is currently inside a task callback.
    in_callback: bool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending.len())
            .field("ready_count", &self.ready_count)
            .field("last_id", &self.last_id)
            .field("shutdown", &self.shutdown)
            .field("tasks_run", &self.tasks_run)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            ready: std::array::from_fn(|_| Vec::new()),
            last_id: 0,
            lowest_pending_id: 0,
            shutdown: false,
            ready_count: 0,
            tasks_run: 0,
            current_priority: Priority::Default,
            in_callback: false,
        }
    }

    /// Run a scheduler on the calling thread until it has no work left.
    ///
    /// `initial` is dispatched first with reason [`Reason::STARTUP`]; all
    /// further work is whatever it (transitively) registers. The call
    /// returns when no task is pending or ready, or when a shutdown signal
    /// (SIGINT/SIGTERM/SIGQUIT/SIGHUP) or a call to [`Scheduler::shutdown`]
    /// has been observed and every shutdown-eligible task has completed.
    /// Signal handlers are installed only for the duration of this call.
    ///
    /// There is no status code: a caller that needs to communicate failure
    /// outward does so through state captured by its closures.
    pub fn run(initial: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static) {
        let mut sched = Scheduler::new();
        let signals = ShutdownSignals::install();
        sched.add_continuation(true, Reason::STARTUP, initial);

        let mut rs = FdSet::new();
        let mut ws = FdSet::new();
        let mut last_tasks_run = 0_u64;
        let mut busy_wait_count = 0_u32;
        while !sched.shutdown
            && !signals.is_raised()
            && !(sched.pending.is_empty() && sched.ready_count == 0)
        {
            rs.clear();
            ws.clear();
            let mut timeout: Option<Duration> = None;
            sched.update_sets(&mut rs, &mut ws, &mut timeout);
            if sched.ready_count > 0 {
                // More work is already ready; poll without blocking.
                timeout = Some(Duration::ZERO);
            }
            let n_ready = match poll_sets(&mut rs, &mut ws, timeout) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(%err, "fatal error from poll, aborting dispatch loop");
                    return;
                }
            };
            if last_tasks_run == sched.tasks_run {
                busy_wait_count += 1;
            } else {
                last_tasks_run = sched.tasks_run;
                busy_wait_count = 0;
            }
            if n_ready == 0
                && timeout == Some(Duration::ZERO)
                && busy_wait_count > BUSY_WAIT_THRESHOLD
            {
                tracing::warn!("looks like we are busy waiting, throttling the dispatch loop");
                std::thread::sleep(BUSY_WAIT_PAUSE);
            }
            sched.check_ready(Some(&rs), Some(&ws));
            sched.run_ready();
        }

        if signals.is_raised() {
            sched.shutdown = true;
        }
        drop(signals);

        // Shutdown drain: only shutdown-eligible tasks are still admitted,
        // and they may keep registering follow-up cleanup work.
        loop {
            sched.run_ready();
            sched.check_ready(None, None);
            if sched.ready_count == 0 {
                break;
            }
        }
        // Whatever is left pending declined to run during shutdown.
        sched.pending.clear();
    }

    /// Request shutdown: from now on only shutdown-eligible tasks are
    /// admitted, and `run()` returns once they have drained.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Number of tasks ready to run in the given band; [`Priority::Keep`]
    /// resolves to the band of the currently running task. Callers use this
    /// to back-pressure elective work. See [`Scheduler::ready_total`] for
    /// the sum over all bands.
    #[must_use]
    pub fn get_load(&self, prio: Priority) -> usize {
        let band = match prio {
            Priority::Keep => self.current_priority.band(),
            other => other.band(),
        };
        self.ready[band].len()
    }

    /// Total number of ready tasks across all bands.
    #[must_use]
    pub fn ready_total(&self) -> usize {
        self.ready_count
    }

    // ------------------------------------------------------------------
    // Registration family. Everything reduces to `add_select`.
    // ------------------------------------------------------------------

    /// Schedule `cb` once `delay` has expired (and `prereq`, if any, has
    /// completed).
    pub fn add_delayed(
        &mut self,
        delay: Duration,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        self.add_select(None, None, Timeout::In(delay), prio, prereq, run_on_shutdown, cb)
    }

    /// Schedule `cb` to run as soon as the task `prereq` has completed.
    pub fn add_after(
        &mut self,
        prereq: TaskId,
        prio: Priority,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        self.add_select(None, None, Timeout::ZERO, prio, Some(prereq), run_on_shutdown, cb)
    }

    /// Splice `cb` directly into the ready queue with a caller-supplied
    /// reason, at the priority of the currently running task. This is how
    /// synchronous callers continue the current execution without blocking
    /// the dispatch loop, and how a long computation yields between slices.
    pub fn add_continuation(
        &mut self,
        run_on_shutdown: bool,
        reason: Reason,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        self.last_id += 1;
        let task = Task {
            id: TaskId(self.last_id),
            callback: Box::new(cb),
            read_set: FdSet::new(),
            write_set: FdSet::new(),
            deadline: Deadline::Never,
            prereq: None,
            priority: self.current_priority,
            run_on_shutdown,
            reason,
        };
        let id = task.id;
        self.queue_ready_task(task);
        id
    }

    /// Schedule `cb` when `socket` is readable, with `delay` as a timeout.
    pub fn add_read_net(
        &mut self,
        socket: &impl AsFd,
        delay: Timeout,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        let mut rs = FdSet::new();
        rs.add_socket(socket);
        self.add_select(Some(&rs), None, delay, prio, prereq, run_on_shutdown, cb)
    }

    /// Schedule `cb` when `socket` is writable, with `delay` as a timeout.
    pub fn add_write_net(
        &mut self,
        socket: &impl AsFd,
        delay: Timeout,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        let mut ws = FdSet::new();
        ws.add_socket(socket);
        self.add_select(None, Some(&ws), delay, prio, prereq, run_on_shutdown, cb)
    }

    /// Schedule `cb` when the pipe/file handle is readable, with `delay` as
    /// a timeout.
    pub fn add_read_file(
        &mut self,
        file: &impl AsFd,
        delay: Timeout,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        let mut rs = FdSet::new();
        rs.add_file(file);
        self.add_select(Some(&rs), None, delay, prio, prereq, run_on_shutdown, cb)
    }

    /// Schedule `cb` when the pipe/file handle is writable, with `delay` as
    /// a timeout.
    pub fn add_write_file(
        &mut self,
        file: &impl AsFd,
        delay: Timeout,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        let mut ws = FdSet::new();
        ws.add_file(file);
        self.add_select(None, Some(&ws), delay, prio, prereq, run_on_shutdown, cb)
    }

    /// The general registration form; every other `add_*` reduces to it.
    ///
    /// The task becomes eligible once its prerequisite (if any) has
    /// completed AND any of the following holds: the delay expired, an fd
    /// in `rs` is readable, an fd in `ws` is writable, or shutdown is in
    /// progress and the task is shutdown-eligible. The interest sets are
    /// copied; the caller may reuse its own sets immediately. The returned
    /// id is valid until the callback starts executing.
    ///
    /// # Panics
    ///
    /// If `prio` is [`Priority::Keep`] and no task is currently running, or
    /// if `prereq` names an id that was never assigned.
    pub fn add_select(
        &mut self,
        rs: Option<&FdSet>,
        ws: Option<&FdSet>,
        delay: Timeout,
        prio: Priority,
        prereq: Option<TaskId>,
        run_on_shutdown: bool,
        cb: impl FnOnce(&mut Scheduler, &TaskContext<'_>) + 'static,
    ) -> TaskId {
        let priority = match prio {
            Priority::Keep => {
                assert!(
                    self.in_callback,
                    "Priority::Keep used outside a running task callback"
                );
                self.current_priority
            }
            other => other,
        };
        if let Some(prereq_id) = prereq {
            assert!(
                prereq_id.raw() <= self.last_id,
                "prerequisite task {prereq_id} has never existed"
            );
        }
        self.last_id += 1;
        let mut read_set = FdSet::new();
        if let Some(rs) = rs {
            read_set.copy_from(rs);
        }
        let mut write_set = FdSet::new();
        if let Some(ws) = ws {
            write_set.copy_from(ws);
        }
        let task = Task {
            id: TaskId(self.last_id),
            callback: Box::new(cb),
            read_set,
            write_set,
            deadline: delay.to_deadline(Instant::now()),
            prereq,
            priority,
            run_on_shutdown,
            reason: Reason::empty(),
        };
        let id = task.id;
        tracing::trace!(task = %id, ?priority, "registered");
        self.pending.push(task);
        id
    }

    /// Cancel a task that has not run yet, wherever it is queued, and hand
    /// its closure back to the caller. Tasks that declared the cancelled
    /// task as a prerequisite see it as completed.
    ///
    /// # Panics
    ///
    /// If `id` names a task that already ran or never existed.
    pub fn cancel(&mut self, id: TaskId) -> TaskFn {
        if let Some(idx) = self.pending.iter().position(|t| t.id == id) {
            let task = self.pending.remove(idx);
            return task.callback;
        }
        for band in 1..PRIORITY_COUNT {
            if let Some(idx) = self.ready[band].iter().position(|t| t.id == id) {
                let task = self.ready[band].remove(idx);
                self.ready_count -= 1;
                return task.callback;
            }
        }
        panic!("attempt to cancel task {id} which already ran or never existed");
    }

    // ------------------------------------------------------------------
    // Dispatch loop internals.
    // ------------------------------------------------------------------

    /// Is a task with this id still in the system? Updates the
    /// `lowest_pending_id` hint as a side effect when the answer is no.
    fn is_pending(&mut self, id: TaskId) -> bool {
        if id.raw() < self.lowest_pending_id {
            return false;
        }
        let mut min = u64::MAX;
        for task in &self.pending {
            if task.id == id {
                return true;
            }
            min = min.min(task.id.raw());
        }
        for band in &self.ready {
            for task in band {
                if task.id == id {
                    return true;
                }
                min = min.min(task.id.raw());
            }
        }
        self.lowest_pending_id = min;
        false
    }

    /// Union every eligible pending task's interests into the scratch sets
    /// and lower `timeout` to the nearest deadline. Tasks whose prerequisite
    /// is still in the system contribute nothing this iteration.
    fn update_sets(&mut self, rs: &mut FdSet, ws: &mut FdSet, timeout: &mut Option<Duration>) {
        let now = Instant::now();
        for idx in 0..self.pending.len() {
            if let Some(prereq_id) = self.pending[idx].prereq {
                if self.is_pending(prereq_id) {
                    continue;
                }
            }
            let task = &self.pending[idx];
            if let Some(left) = task.deadline.remaining(now) {
                if timeout.is_none_or(|current| current > left) {
                    *timeout = Some(left);
                }
            }
            rs.add_set(&task.read_set);
            ws.add_set(&task.write_set);
        }
    }

    /// Evaluate the dispatch condition of `pending[idx]` and return the
    /// reason bits if it may run now.
    fn task_readiness(
        &mut self,
        idx: usize,
        now: Instant,
        rs: Option<&FdSet>,
        ws: Option<&FdSet>,
    ) -> Option<Reason> {
        let (run_on_shutdown, deadline, prereq) = {
            let task = &self.pending[idx];
            (task.run_on_shutdown, task.deadline, task.prereq)
        };
        if self.shutdown && !run_on_shutdown {
            return None;
        }
        let mut reason = Reason::empty();
        if self.shutdown && run_on_shutdown {
            reason |= Reason::SHUTDOWN;
        }
        if deadline.is_due(now) {
            reason |= Reason::TIMEOUT;
        }
        if let Some(rs) = rs {
            if rs.overlaps(&self.pending[idx].read_set) {
                reason |= Reason::READ_READY;
            }
        }
        if let Some(ws) = ws {
            if ws.overlaps(&self.pending[idx].write_set) {
                reason |= Reason::WRITE_READY;
            }
        }
        if reason.is_empty() {
            return None;
        }
        if let Some(prereq_id) = prereq {
            if self.is_pending(prereq_id) {
                return None;
            }
            reason |= Reason::PREREQ_DONE;
        }
        Some(reason)
    }

    /// Move every satisfied pending task to the ready stack of its band,
    /// freezing its reason bits and narrowing its interest sets to the fds
    /// that actually fired.
    fn check_ready(&mut self, rs: Option<&FdSet>, ws: Option<&FdSet>) {
        let now = Instant::now();
        let mut idx = 0;
        while idx < self.pending.len() {
            match self.task_readiness(idx, now, rs, ws) {
                Some(reason) => {
                    let mut task = self.pending.remove(idx);
                    task.reason = reason;
                    if reason.contains(Reason::READ_READY) {
                        task.read_set.intersect(rs.expect("READ_READY without a ready set"));
                    } else {
                        task.read_set.clear();
                    }
                    if reason.contains(Reason::WRITE_READY) {
                        task.write_set.intersect(ws.expect("WRITE_READY without a ready set"));
                    } else {
                        task.write_set.clear();
                    }
                    self.queue_ready_task(task);
                }
                None => idx += 1,
            }
        }
    }

    fn queue_ready_task(&mut self, task: Task) {
        debug_assert!(!task.reason.is_empty());
        self.ready[task.priority.band()].push(task);
        self.ready_count += 1;
    }

    /// Drain the ready stacks in strict priority order. Returns to the
    /// caller (for another OS wait) as soon as a band below Urgent has run
    /// while pending work exists; Urgent work is always drained completely
    /// first so it is never stalled behind an I/O round trip.
    fn run_ready(&mut self) {
        loop {
            if self.ready_count == 0 {
                return;
            }
            debug_assert!(self.ready[Priority::Keep.band()].is_empty());
            let band = (1..PRIORITY_COUNT)
                .rev()
                .find(|&band| !self.ready[band].is_empty())
                .expect("ready_count does not match the ready stacks");
            let task = self.ready[band].pop().expect("band emptied underneath us");
            self.ready_count -= 1;
            self.current_priority = task.priority;
            tracing::trace!(task = %task.id, reason = ?task.reason, "dispatching");
            let Task {
                callback,
                read_set,
                write_set,
                reason,
                ..
            } = task;
            let ctx = TaskContext {
                reason,
                read_ready: &read_set,
                write_ready: &write_set,
            };
            self.in_callback = true;
            callback(self, &ctx);
            self.in_callback = false;
            self.tasks_run += 1;
            if !self.pending.is_empty() && band != Priority::Urgent.band() {
                return;
            }
        }
    }
}
