// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Runtime core for the meshkit peer-to-peer framework.
//!
//! Everything asynchronous in the framework is expressed through the
//! cooperative [`Scheduler`]: file-descriptor readiness, deadlines, and
//! prerequisite edges between tasks. The [`client`] module layers the
//! per-service connection queue (length-prefixed framing, transmit-when-
//! writable, reconnect with backoff) on top of scheduler tasks, and [`net`]
//! provides the opaque [`FdSet`] the scheduler multiplexes over.
//!
//! The scheduling model is single-threaded and cooperative: callbacks run to
//! completion before the next callback begins, so task-owned data needs no
//! locks, and a callback that wants to do a lot of work yields by
//! re-scheduling a continuation rather than blocking the loop.
//!
//! ```no_run
//! use meshkit_core::{Priority, Reason, Scheduler};
//! use std::time::Duration;
//!
//! Scheduler::run(|sched, _ctx| {
//!     sched.add_delayed(
//!         Duration::from_millis(50),
//!         Priority::Default,
//!         None,
//!         false,
//!         |_sched, ctx| {
//!             assert!(ctx.reason.contains(Reason::TIMEOUT));
//!         },
//!     );
//! });
//! ```

pub mod client;
pub mod net;
pub mod sched;

pub use client::{
    ClientConfig, ClientError, Frame, FrameError, FrameTokenizer, MessageBuf, MessageHandler,
    ServiceClient, TransmitStatus, TransmitTicket,
};
pub use net::FdSet;
pub use sched::{
    Deadline, PRIORITY_COUNT, Priority, Reason, Scheduler, TaskContext, TaskFn, TaskId, Timeout,
};
