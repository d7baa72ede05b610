// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

// cspell:words SIGINT SIGTERM SIGQUIT SIGHUP sigaction

//! Shutdown-signal plumbing for [`Scheduler::run`].
//!
//! The contract is deliberately tiny: each handler performs a single flag
//! store, and all interpretation happens on the scheduler thread inside the
//! dispatch loop. Handlers are installed for the duration of one `run()`
//! call and unregistered on drop, so nested schedulers and test harnesses
//! can chain without stepping on each other.
//!
//! [`Scheduler::run`]: crate::sched::Scheduler::run

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// RAII guard over the installed shutdown-signal handlers.
#[derive(Debug)]
pub(crate) struct ShutdownSignals {
    flag: Arc<AtomicBool>,
    registered: Vec<signal_hook::SigId>,
}

impl ShutdownSignals {
    /// Install flag-setting handlers for the interrupt/terminate/quit/hangup
    /// signals.
    ///
    /// # Panics
    ///
    /// If the OS refuses to install a handler; the scheduler cannot honor
    /// its shutdown contract without them.
    pub(crate) fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let mut registered = Vec::with_capacity(4);
        for sig in [SIGINT, SIGTERM, SIGQUIT, SIGHUP] {
            let id = signal_hook::flag::register(sig, Arc::clone(&flag)).unwrap_or_else(|err| {
                panic!("failed to install shutdown handler for signal {sig}: {err}")
            });
            registered.push(id);
        }
        Self { flag, registered }
    }

    /// Whether any shutdown signal has been delivered since installation.
    pub(crate) fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Drop for ShutdownSignals {
    fn drop(&mut self) {
        for id in self.registered.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
