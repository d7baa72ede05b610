// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! The unit of deferred work: a callback, its dispatch conditions, and the
//! context handed to the callback when those conditions fire.

use super::clock::Deadline;
use super::priority::{Priority, Reason};
use crate::net::FdSet;
use crate::sched::Scheduler;
use std::fmt;

/// Opaque handle to a registered task.
///
/// Ids are assigned monotonically and never reused within one scheduler. An
/// id stays valid only until the task's callback begins executing; holding it
/// longer (e.g. to cancel) is a programming error once the callback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task's main function.
///
/// Callbacks receive the scheduler re-entrantly (the dispatched task has
/// already been detached from every queue) so they can register follow-up
/// work, plus the [`TaskContext`] describing why they ran. The boxed closure
/// owns whatever state the callback needs; the scheduler never inspects it.
pub type TaskFn = Box<dyn FnOnce(&mut Scheduler, &TaskContext<'_>)>;

/// Why and with what readiness a task was dispatched.
#[derive(Debug)]
pub struct TaskContext<'a> {
    /// The conditions that promoted the task, frozen at promotion time.
    pub reason: Reason,
    /// The fds from the task's read-interest set that actually fired.
    /// Empty unless [`Reason::READ_READY`] is set.
    pub read_ready: &'a FdSet,
    /// The fds from the task's write-interest set that actually fired.
    /// Empty unless [`Reason::WRITE_READY`] is set.
    pub write_ready: &'a FdSet,
}

/// Internal representation of a registered task.
///
/// Lives in the pending list until its dispatch condition is evaluated, then
/// in exactly one ready band until its callback runs, after which it is
/// destroyed. The interest sets are owned copies; on promotion they are
/// overwritten with the fds that actually fired so the callback can inspect
/// them through [`TaskContext`].
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) callback: TaskFn,
    pub(crate) read_set: FdSet,
    pub(crate) write_set: FdSet,
    pub(crate) deadline: Deadline,
    pub(crate) prereq: Option<TaskId>,
    /// Resolved band; never [`Priority::Keep`].
    pub(crate) priority: Priority,
    pub(crate) run_on_shutdown: bool,
    /// Zero while pending; set exactly once on promotion.
    pub(crate) reason: Reason,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("deadline", &self.deadline)
            .field("prereq", &self.prereq)
            .field("run_on_shutdown", &self.run_on_shutdown)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}
