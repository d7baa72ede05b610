// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Relative and absolute time for task registration.
//!
//! Registrations speak in relative terms ([`Timeout`]); the scheduler pins
//! them to an absolute [`Deadline`] once, at registration time, so that a
//! slow callback cannot stretch another task's delay.

use std::time::{Duration, Instant};

/// A relative delay: either a bounded duration or "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fire after this much time has passed.
    In(Duration),
    /// No time-based trigger; the task waits on its other conditions alone.
    Never,
}

impl Timeout {
    /// A zero delay: due immediately.
    pub const ZERO: Timeout = Timeout::In(Duration::ZERO);

    /// Pin this relative delay to an absolute deadline.
    #[must_use]
    pub fn to_deadline(self, now: Instant) -> Deadline {
        match self {
            Timeout::In(delay) => Deadline::At(now + delay),
            Timeout::Never => Deadline::Never,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(delay: Duration) -> Self {
        Timeout::In(delay)
    }
}

/// An absolute point in time a task is waiting for, or "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Due once `now` reaches this instant.
    At(Instant),
    /// Never due.
    Never,
}

impl Deadline {
    /// Whether the deadline has passed (a deadline of exactly `now` counts).
    #[must_use]
    pub fn is_due(self, now: Instant) -> bool {
        match self {
            Deadline::At(at) => now >= at,
            Deadline::Never => false,
        }
    }

    /// Time left until the deadline; `None` for [`Deadline::Never`], zero if
    /// already due.
    #[must_use]
    pub fn remaining(self, now: Instant) -> Option<Duration> {
        match self {
            Deadline::At(at) => Some(at.saturating_duration_since(now)),
            Deadline::Never => None,
        }
    }

    /// Back to a relative [`Timeout`], measured from `now`.
    #[must_use]
    pub fn to_timeout(self, now: Instant) -> Timeout {
        match self.remaining(now) {
            Some(left) => Timeout::In(left),
            None => Timeout::Never,
        }
    }
}
