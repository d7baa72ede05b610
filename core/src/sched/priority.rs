// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Priority bands and the reason bitfield carried into task callbacks.

use strum_macros::Display;

/// Number of priority bands, including the [`Priority::Keep`] sentinel at
/// index 0 (whose ready queue must always stay empty).
pub const PRIORITY_COUNT: usize = 7;

/// How important a task is, relative to every other task.
///
/// Dispatch is strictly ordered: a ready task in a higher band always runs
/// before a ready task in a lower band. Within one band the most recently
/// promoted task runs first; callers that need FIFO ordering chain tasks via
/// prerequisites instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[repr(usize)]
pub enum Priority {
    /// Sentinel: inherit the priority of the task that is currently running.
    ///
    /// Only valid while a callback is executing; registering with `Keep` from
    /// outside the dispatch loop is a programming error.
    Keep = 0,
    /// Run when nothing else wants the CPU.
    Idle = 1,
    /// Maintenance work that can be arbitrarily delayed.
    Background = 2,
    /// The default for ordinary work.
    Default = 3,
    /// Latency-sensitive work.
    High = 4,
    /// Cleanup work that must beat ordinary tasks once shutdown begins.
    Shutdown = 5,
    /// Drained completely before the scheduler returns to the OS wait, so
    /// that urgent work is never stalled behind an I/O round trip.
    Urgent = 6,
}

impl Priority {
    /// Index of this band in the ready-queue array.
    #[must_use]
    pub(crate) fn band(self) -> usize {
        self as usize
    }
}

bitflags::bitflags! {
    /// Why a task was promoted to the ready queue.
    ///
    /// Zero while the task is pending; set exactly once on promotion and
    /// frozen from then on. Several bits may be set at once when several
    /// conditions held in the same iteration (e.g. a deadline expiring in
    /// the iteration that also saw the fd become readable).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Reason: u8 {
        /// This is the initial task handed to [`Scheduler::run`].
        ///
        /// [`Scheduler::run`]: crate::sched::Scheduler::run
        const STARTUP = 1 << 0;
        /// Shutdown is in progress and the task asked to run during it.
        const SHUTDOWN = 1 << 1;
        /// The task's deadline has passed.
        const TIMEOUT = 1 << 2;
        /// At least one fd in the task's read-interest set is readable.
        const READ_READY = 1 << 3;
        /// At least one fd in the task's write-interest set is writable.
        const WRITE_READY = 1 << 4;
        /// The task declared a prerequisite and it has completed.
        const PREREQ_DONE = 1 << 5;
    }
}
