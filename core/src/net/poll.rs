// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

// cspell:words pollfd nfds POLLIN POLLOUT POLLPRI POLLHUP POLLERR POLLNVAL EINTR

//! The one OS-specific module: blocking on fd readiness via `poll(2)`.
//!
//! Everything above this layer manipulates [`FdSet`]s; this function is the
//! only place the crate talks to the platform multiplexer.

use crate::net::FdSet;
use std::io;
use std::time::Duration;

/// Block until an fd in `rs` is readable, an fd in `ws` is writable, the
/// timeout expires (`None` = wait forever), or a signal arrives.
///
/// On return both sets are rewritten to contain only the fds that reported
/// readiness; hangup and error conditions count as both readable and
/// writable so the owning task wakes up and observes the failure from its
/// own read/write call. Returns the number of fds with events.
///
/// A signal interruption surfaces as [`io::ErrorKind::Interrupted`]; the
/// caller is expected to re-check its shutdown flag and retry.
pub(crate) fn poll_sets(
    rs: &mut FdSet,
    ws: &mut FdSet,
    timeout: Option<Duration>,
) -> io::Result<usize> {
    let mut entries: Vec<libc::pollfd> = Vec::with_capacity(rs.len() + ws.len());
    for fd in rs.iter() {
        entries.push(libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        });
    }
    for fd in ws.iter() {
        match entries.iter_mut().find(|e| e.fd == fd) {
            Some(entry) => entry.events |= libc::POLLOUT,
            None => entries.push(libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            }),
        }
    }

    let timeout_ms = match timeout {
        None => -1,
        Some(delay) => millis_ceil(delay),
    };

    // Safety: `entries` is a valid, exclusively borrowed array of
    // `entries.len()` pollfd structs for the duration of the call.
    let rc = unsafe { libc::poll(entries.as_mut_ptr(), entries.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let read_fired = libc::POLLIN | libc::POLLPRI | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
    let write_fired = libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
    let mut ready_rs = FdSet::new();
    let mut ready_ws = FdSet::new();
    for entry in &entries {
        if rs.contains_raw(entry.fd) && (entry.revents & read_fired) != 0 {
            ready_rs.add_raw(entry.fd);
        }
        if ws.contains_raw(entry.fd) && (entry.revents & write_fired) != 0 {
            ready_ws.add_raw(entry.fd);
        }
    }
    *rs = ready_rs;
    *ws = ready_ws;

    #[allow(clippy::cast_sign_loss)]
    Ok(rc as usize)
}

/// Whole milliseconds, rounded up so we never wake before a deadline, capped
/// at the largest value `poll(2)` accepts.
fn millis_ceil(delay: Duration) -> libc::c_int {
    let millis = delay.as_millis();
    let rounded = if Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)) < delay {
        millis + 1
    } else {
        millis
    };
    libc::c_int::try_from(rounded).unwrap_or(libc::c_int::MAX)
}
