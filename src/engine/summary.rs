//! Aggregate rollup over the current registry snapshot.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

use crate::core::units::round2;
use crate::engine::registry::DriveRegistry;

/// Totals shown in the summary panel.
///
/// `nominal_total_gib` is `drive_count × nominal_gib_per_drive`. It is a fixed
/// heuristic and deliberately ignores the totals remotes report.
///
/// The GiB totals sum each entry's displayed (already rounded) value, then
/// round the sum, so the panel always agrees with the tiles. The byte totals
/// are exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub drive_count: usize,
    pub nominal_total_gib: f64,
    pub total_used_gib: f64,
    pub total_free_gib: f64,
    pub total_used_bytes: u64,
    pub total_free_bytes: u64,
    pub reachable_count: usize,
    pub unreachable_count: usize,
}

impl AggregateSummary {
    /// Remotes discovered but not reported yet.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.drive_count
            .saturating_sub(self.reachable_count + self.unreachable_count)
    }
}

/// Fold the registry into an [`AggregateSummary`].
#[must_use]
pub fn recompute(registry: &DriveRegistry, nominal_gib_per_drive: f64) -> AggregateSummary {
    let drive_count = registry.discovered().len();
    let mut summary = AggregateSummary {
        drive_count,
        nominal_total_gib: round2(drive_count as f64 * nominal_gib_per_drive),
        ..AggregateSummary::default()
    };

    let mut used_gib = 0.0;
    let mut free_gib = 0.0;
    for entry in registry.entries() {
        match entry.stats() {
            Some(stats) => {
                used_gib += stats.used_gib();
                free_gib += stats.free_gib();
                summary.total_used_bytes = summary.total_used_bytes.saturating_add(stats.used_bytes);
                summary.total_free_bytes = summary.total_free_bytes.saturating_add(stats.free_bytes);
                summary.reachable_count += 1;
            }
            None => summary.unreachable_count += 1,
        }
    }
    summary.total_used_gib = round2(used_gib);
    summary.total_free_gib = round2(free_gib);
    summary
}
