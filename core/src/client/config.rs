// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Configuration for service client connections.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where to find local services and how aggressively to redial them.
///
/// Each service is reached over a Unix domain socket at
/// `<socket_dir>/<service>.sock` unless an explicit override is configured
/// for that service name.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding one listening socket per service.
    pub socket_dir: PathBuf,
    /// Per-service socket path overrides.
    pub socket_overrides: HashMap<String, PathBuf>,
    /// First redial delay after a transport error.
    pub backoff_initial: Duration,
    /// Redial delay ceiling; doubling stops here.
    pub backoff_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir().join("meshkit"),
            socket_overrides: HashMap::new(),
            backoff_initial: Duration::from_millis(50),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Resolve a service name to the socket path to dial.
    #[must_use]
    pub fn service_socket_path(&self, service: &str) -> PathBuf {
        self.socket_overrides
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.socket_dir.join(format!("{service}.sock")))
    }

    /// Override the socket path for one service.
    #[must_use]
    pub fn with_service_socket(mut self, service: impl Into<String>, path: PathBuf) -> Self {
        self.socket_overrides.insert(service.into(), path);
        self
    }

    /// Set both reconnect backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolves_default_and_override_paths() {
        let config = ClientConfig::default()
            .with_service_socket("statistics", PathBuf::from("/run/stats.sock"));
        assert_eq!(
            config.service_socket_path("statistics"),
            PathBuf::from("/run/stats.sock")
        );
        assert_eq!(
            config.service_socket_path("transport"),
            config.socket_dir.join("transport.sock")
        );
    }
}
