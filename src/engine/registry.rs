//! Cycle-scoped drive registry: the single source of truth for tiles and summary.
//!
//! Entries are appended in probe completion order and never mutated. Starting a
//! new cycle discards everything; entries tagged with an older cycle are refused.

#![allow(missing_docs)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::units::to_display_unit;

/// Monotonically increasing refresh cycle identifier.
pub type CycleId = u64;

/// Capacity figures for one reachable remote, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStats {
    pub total_bytes: u64,
    /// Includes the remote's secondary "other" usage.
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl DriveStats {
    #[must_use]
    pub fn total_gib(&self) -> f64 {
        to_display_unit(self.total_bytes)
    }

    #[must_use]
    pub fn used_gib(&self) -> f64 {
        to_display_unit(self.used_bytes)
    }

    #[must_use]
    pub fn free_gib(&self) -> f64 {
        to_display_unit(self.free_bytes)
    }
}

/// Outcome of probing one remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriveStatus {
    Reachable(DriveStats),
    Unreachable { reason: String },
}

/// A remote paired with its probe outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveEntry {
    pub name: String,
    pub status: DriveStatus,
}

impl DriveEntry {
    #[must_use]
    pub fn reachable(name: impl Into<String>, stats: DriveStats) -> Self {
        Self {
            name: name.into(),
            status: DriveStatus::Reachable(stats),
        }
    }

    #[must_use]
    pub fn unreachable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DriveStatus::Unreachable {
                reason: reason.into(),
            },
        }
    }

    #[must_use]
    pub fn stats(&self) -> Option<&DriveStats> {
        match &self.status {
            DriveStatus::Reachable(stats) => Some(stats),
            DriveStatus::Unreachable { .. } => None,
        }
    }

    /// Name without rclone's trailing colon, as shown on tiles.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.strip_suffix(':').unwrap_or(&self.name)
    }
}

/// Why an append was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendRejection {
    /// Event belongs to a superseded cycle.
    StaleCycle,
    /// Discovery for this cycle has not been recorded yet.
    NotDiscovered,
    /// Name is not part of this cycle's discovered set.
    UnknownRemote,
    /// Name already has an entry this cycle.
    Duplicate,
}

/// Ordered, cycle-versioned store of drive entries.
#[derive(Debug, Clone, Default)]
pub struct DriveRegistry {
    cycle: CycleId,
    discovered: Option<Vec<String>>,
    entries: Vec<DriveEntry>,
    seen: HashSet<String>,
}

impl DriveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all state and start `cycle`. Returns the new cycle id.
    pub fn begin_cycle(&mut self) -> CycleId {
        self.cycle += 1;
        self.discovered = None;
        self.entries.clear();
        self.seen.clear();
        self.cycle
    }

    /// Record the discovered remote set for `cycle`. Returns false if stale.
    pub fn set_discovered(&mut self, cycle: CycleId, remotes: Vec<String>) -> bool {
        if cycle != self.cycle {
            return false;
        }
        self.discovered = Some(remotes);
        true
    }

    /// Append an entry for `cycle`, returning its index.
    pub fn append(
        &mut self,
        cycle: CycleId,
        entry: DriveEntry,
    ) -> Result<usize, AppendRejection> {
        if cycle != self.cycle {
            return Err(AppendRejection::StaleCycle);
        }
        let Some(discovered) = &self.discovered else {
            return Err(AppendRejection::NotDiscovered);
        };
        if !discovered.iter().any(|name| *name == entry.name) {
            return Err(AppendRejection::UnknownRemote);
        }
        if !self.seen.insert(entry.name.clone()) {
            return Err(AppendRejection::Duplicate);
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    #[must_use]
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// Remotes discovered this cycle (empty until discovery completes).
    #[must_use]
    pub fn discovered(&self) -> &[String] {
        self.discovered.as_deref().unwrap_or(&[])
    }

    #[must_use]
    pub fn is_discovered(&self) -> bool {
        self.discovered.is_some()
    }

    #[must_use]
    pub fn entries(&self) -> &[DriveEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every discovered remote has reported this cycle.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.discovered
            .as_ref()
            .is_some_and(|d| d.len() == self.entries.len())
    }
}
