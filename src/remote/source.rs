//! Collaborator traits for remote discovery and per-remote usage probes.
//!
//! Implementations must be `Send + Sync`: the coordinator shares one source
//! across every probe thread of a refresh cycle.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{LobbyError, Result};
use crate::engine::registry::DriveStats;

/// Raw usage figures as reported by a remote, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUsage {
    pub total: u64,
    pub used: u64,
    /// Space consumed outside the user's files (trash, versions, other apps).
    pub other: u64,
    pub free: u64,
}

impl RemoteUsage {
    /// Fold the secondary usage category into `used`.
    #[must_use]
    pub fn into_stats(self) -> DriveStats {
        DriveStats {
            total_bytes: self.total,
            used_bytes: self.used.saturating_add(self.other),
            free_bytes: self.free,
        }
    }
}

/// Lists the remotes currently configured.
pub trait RemoteDiscovery: Send + Sync {
    /// Returns remote names; any failure yields an empty list.
    fn list_remotes(&self) -> Vec<String>;
}

/// Describes a single remote's capacity.
pub trait RemoteProbe: Send + Sync {
    fn describe(&self, remote: &str) -> Result<RemoteUsage>;
}

/// Both halves of the external collaborator.
pub trait RemoteSource: RemoteDiscovery + RemoteProbe {}

impl<T: RemoteDiscovery + RemoteProbe> RemoteSource for T {}

/// Drop duplicate names while keeping first-seen order.
#[must_use]
pub fn dedup_remote_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(names.len());
    names
        .into_iter()
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

/// Scripted behaviour for one remote of the mock source.
#[derive(Debug, Clone)]
pub enum MockProbe {
    Usage { usage: RemoteUsage, delay: Duration },
    Fail { details: String, delay: Duration },
    /// The worker thread panics after `delay`.
    Panic { delay: Duration },
}

/// In-memory remote source for deterministic tests.
#[derive(Debug, Default)]
pub struct MockRemoteSource {
    remotes: Mutex<Vec<String>>,
    probes: Mutex<HashMap<String, MockProbe>>,
    calls: Mutex<Vec<String>>,
}

impl MockRemoteSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote that reports `usage` after `delay`.
    #[must_use]
    pub fn with_usage(self, name: &str, usage: RemoteUsage, delay: Duration) -> Self {
        self.remotes.lock().push(name.to_string());
        self.probes
            .lock()
            .insert(name.to_string(), MockProbe::Usage { usage, delay });
        self
    }

    /// Register a remote whose probe fails after `delay`.
    #[must_use]
    pub fn with_failure(self, name: &str, details: &str, delay: Duration) -> Self {
        self.remotes.lock().push(name.to_string());
        self.probes.lock().insert(
            name.to_string(),
            MockProbe::Fail {
                details: details.to_string(),
                delay,
            },
        );
        self
    }

    /// Register a remote whose probe panics after `delay`.
    #[must_use]
    pub fn with_panic(self, name: &str, delay: Duration) -> Self {
        self.remotes.lock().push(name.to_string());
        self.probes
            .lock()
            .insert(name.to_string(), MockProbe::Panic { delay });
        self
    }

    /// Replace the discovered set without touching probe scripts.
    pub fn set_remotes(&self, names: &[&str]) {
        *self.remotes.lock() = names.iter().map(|n| (*n).to_string()).collect();
    }

    /// Remotes probed so far, in call order.
    #[must_use]
    pub fn probe_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl RemoteDiscovery for MockRemoteSource {
    fn list_remotes(&self) -> Vec<String> {
        self.remotes.lock().clone()
    }
}

impl RemoteProbe for MockRemoteSource {
    fn describe(&self, remote: &str) -> Result<RemoteUsage> {
        self.calls.lock().push(remote.to_string());
        let script = self.probes.lock().get(remote).cloned();
        match script {
            Some(MockProbe::Usage { usage, delay }) => {
                std::thread::sleep(delay);
                Ok(usage)
            }
            Some(MockProbe::Fail { details, delay }) => {
                std::thread::sleep(delay);
                Err(LobbyError::probe(remote, details))
            }
            Some(MockProbe::Panic { delay }) => {
                std::thread::sleep(delay);
                panic!("scripted panic for {remote}");
            }
            None => Err(LobbyError::probe(remote, "unknown remote")),
        }
    }
}
