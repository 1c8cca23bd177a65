//! Responsive grid composition for drive tiles and the summary panel.
//!
//! Everything here is a pure function of container width, tile count, the
//! current summary and [`LayoutConfig`]. Results are recomputed wholesale on
//! every change; nothing is patched incrementally.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

use crate::core::config::LayoutConfig;
use crate::engine::registry::DriveEntry;
use crate::engine::summary::AggregateSummary;

/// Pixel split of a usage bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BarSplit {
    /// No meaningful total: one neutral segment spanning the bar.
    Neutral { width: u32 },
    Split { used_px: u32, free_px: u32 },
}

impl BarSplit {
    /// Full bar width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        match *self {
            Self::Neutral { width } => width,
            Self::Split { used_px, free_px } => used_px + free_px,
        }
    }

    /// Fraction of the bar that is "used" (0 for neutral bars).
    #[must_use]
    pub fn used_fraction(&self) -> f64 {
        match *self {
            Self::Neutral { .. } => 0.0,
            Self::Split { used_px, free_px } => {
                let width = used_px + free_px;
                if width == 0 {
                    0.0
                } else {
                    f64::from(used_px) / f64::from(width)
                }
            }
        }
    }
}

/// Split `width` pixels between used and free space.
///
/// A total of zero (or less, or non-finite) renders a neutral bar so the ratio
/// never divides by zero. Used space above the total fills the whole bar.
#[must_use]
pub fn compute_usage_bar_split(used: f64, total: f64, width: u32) -> BarSplit {
    if !(total.is_finite() && total > 0.0) {
        return BarSplit::Neutral { width };
    }
    let ratio = if used.is_finite() { used / total } else { 0.0 };
    let used_px = (f64::from(width) * ratio).round().clamp(0.0, f64::from(width)) as u32;
    BarSplit::Split {
        used_px,
        free_px: width - used_px,
    }
}

/// Grid position of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePlacement {
    pub index: usize,
    pub row: usize,
    pub column: usize,
    pub x: u32,
    pub y: u32,
}

/// Placement of the summary panel above the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPlacement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub bar_width: u32,
}

/// Full layout for one (width, tile count, summary) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub container_width: u32,
    pub column_count: usize,
    pub tiles: Vec<TilePlacement>,
    /// Total scrollable height of the content.
    pub scroll_extent: u32,
    pub summary: SummaryPlacement,
    pub summary_bar: BarSplit,
}

impl LayoutResult {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tiles.len().div_ceil(self.column_count.max(1))
    }
}

/// Layout calculator bound to one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEngine {
    geometry: LayoutConfig,
}

impl LayoutEngine {
    #[must_use]
    pub const fn new(geometry: LayoutConfig) -> Self {
        Self { geometry }
    }

    #[must_use]
    pub const fn geometry(&self) -> &LayoutConfig {
        &self.geometry
    }

    /// Horizontal distance between tile origins.
    #[must_use]
    pub fn tile_pitch(&self) -> u32 {
        self.geometry.tile_width.saturating_add(self.geometry.x_pad)
    }

    /// Columns that fit in `container_width`; never less than one.
    #[must_use]
    pub fn column_count(&self, container_width: u32) -> usize {
        (container_width / self.tile_pitch().max(1)).max(1) as usize
    }

    /// Height of everything above the first tile row.
    #[must_use]
    pub fn summary_band_height(&self) -> u32 {
        self.geometry
            .y_pad
            .saturating_add(self.geometry.summary_height)
            .saturating_add(self.geometry.y_pad)
    }

    /// Width of the bar drawn inside each tile.
    #[must_use]
    pub fn tile_bar_width(&self) -> u32 {
        self.geometry
            .tile_width
            .saturating_sub(self.geometry.tile_bar_inset)
    }

    #[must_use]
    pub fn summary_placement(&self, container_width: u32) -> SummaryPlacement {
        let g = &self.geometry;
        let margin = (f64::from(container_width) * g.summary_margin_ratio).floor() as u32;
        let width = container_width
            .saturating_sub(margin.saturating_mul(2))
            .max(g.summary_min_width);
        SummaryPlacement {
            x: margin,
            y: g.y_pad,
            width,
            height: g.summary_height,
            bar_width: (f64::from(width) * g.summary_bar_ratio).floor() as u32,
        }
    }

    /// Lay out `tile_count` tiles plus the summary for `container_width`.
    #[must_use]
    pub fn compute_grid(
        &self,
        container_width: u32,
        tile_count: usize,
        summary: &AggregateSummary,
    ) -> LayoutResult {
        let g = &self.geometry;
        let columns = self.column_count(container_width);
        let cols_u32 = u32::try_from(columns).unwrap_or(u32::MAX);
        let grid_width = cols_u32
            .saturating_mul(g.tile_width)
            .saturating_add(cols_u32.saturating_sub(1).saturating_mul(g.x_pad));
        let start_x = container_width.saturating_sub(grid_width) / 2;
        let top = self.summary_band_height();
        let row_pitch = g.tile_height.saturating_add(g.y_pad);

        let tiles = (0..tile_count)
            .map(|index| {
                let row = index / columns;
                let column = index % columns;
                let row_u32 = u32::try_from(row).unwrap_or(u32::MAX);
                TilePlacement {
                    index,
                    row,
                    column,
                    x: start_x.saturating_add((column as u32).saturating_mul(self.tile_pitch())),
                    y: top.saturating_add(row_u32.saturating_mul(row_pitch)),
                }
            })
            .collect::<Vec<_>>();

        let rows = u32::try_from(tile_count.div_ceil(columns)).unwrap_or(u32::MAX);
        let summary_place = self.summary_placement(container_width);
        let summary_bar = compute_usage_bar_split(
            summary.total_used_gib,
            summary.nominal_total_gib,
            summary_place.bar_width,
        );

        LayoutResult {
            container_width,
            column_count: columns,
            tiles,
            scroll_extent: top.saturating_add(rows.saturating_mul(row_pitch)),
            summary: summary_place,
            summary_bar,
        }
    }

    /// Usage bar for one tile; `None` for unreachable remotes.
    #[must_use]
    pub fn tile_bar(&self, entry: &DriveEntry) -> Option<BarSplit> {
        entry.stats().map(|stats| {
            compute_usage_bar_split(stats.used_gib(), stats.total_gib(), self.tile_bar_width())
        })
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}
