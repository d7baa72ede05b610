// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios for the client queue against a mock service on a
//! real Unix socket. Serialized alongside the scheduler suites: those raise
//! process-wide signals that would leak into any scheduler running here.

use crate::client::ClientConfig;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;


/// A scratch socket path for one mock service; the directory guard must
/// outlive the test.
fn scratch_socket(service: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create scratch dir");
    let path = dir.path().join(format!("{service}.sock"));
    (dir, path)
}

/// Test config: short backoff so reconnect scenarios finish quickly.
fn config_for(service: &str, path: &std::path::Path) -> ClientConfig {
    ClientConfig::default()
        .with_backoff(Duration::from_millis(25), Duration::from_secs(1))
        .with_service_socket(service, path.to_path_buf())
}
