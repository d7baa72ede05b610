// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! An opaque set of OS handles used to declare read- and write-interest.
//!
//! Sockets and pipe/file handles go through distinct entry points because
//! some platforms multiplex them through different primitives; the rest of
//! the crate never branches on platform, it only manipulates [`FdSet`]s.

use smallvec::SmallVec;
use std::os::fd::{AsFd, AsRawFd, RawFd};

/// A set of file descriptors, kept sorted and deduplicated.
///
/// Interest sets are almost always one or two fds, so the storage is inline
/// until that assumption breaks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdSet {
    fds: SmallVec<[RawFd; 8]>,
}

impl FdSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every fd.
    pub fn clear(&mut self) {
        self.fds.clear();
    }

    /// Replace this set's contents with `other`'s.
    pub fn copy_from(&mut self, other: &FdSet) {
        self.fds.clear();
        self.fds.extend_from_slice(&other.fds);
    }

    /// Add a socket handle.
    pub fn add_socket(&mut self, socket: &impl AsFd) {
        self.add_raw(socket.as_fd().as_raw_fd());
    }

    /// Add a pipe or file handle.
    pub fn add_file(&mut self, file: &impl AsFd) {
        self.add_raw(file.as_fd().as_raw_fd());
    }

    pub(crate) fn add_raw(&mut self, fd: RawFd) {
        if let Err(pos) = self.fds.binary_search(&fd) {
            self.fds.insert(pos, fd);
        }
    }

    /// Union: add every fd of `other` into this set.
    pub fn add_set(&mut self, other: &FdSet) {
        for fd in other.iter() {
            self.add_raw(fd);
        }
    }

    /// Whether the set contains this handle.
    #[must_use]
    pub fn contains(&self, fd: &impl AsFd) -> bool {
        self.contains_raw(fd.as_fd().as_raw_fd())
    }

    pub(crate) fn contains_raw(&self, fd: RawFd) -> bool {
        self.fds.binary_search(&fd).is_ok()
    }

    /// Whether the two sets share at least one fd.
    #[must_use]
    pub fn overlaps(&self, other: &FdSet) -> bool {
        // Both sides are sorted; walk the shorter one.
        let (small, large) = if self.fds.len() <= other.fds.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().any(|fd| large.contains_raw(fd))
    }

    /// Keep only the fds that also appear in `other`.
    pub fn intersect(&mut self, other: &FdSet) {
        self.fds.retain(|fd| other.contains_raw(*fd));
    }

    /// The fds in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.fds.iter().copied()
    }

    /// Number of fds in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}
