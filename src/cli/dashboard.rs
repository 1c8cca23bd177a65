//! Live terminal dashboard: summary panel plus a reflowing grid of drive tiles.
//!
//! The engine works in pixels; the terminal maps each cell to
//! [`CELL_PX_W`]×[`CELL_PX_H`] pixels so the same layout rules apply. Engine
//! events arrive over a channel and are folded into a local [`DashboardView`];
//! terminal resizes are forwarded to the engine, which debounces them.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

use crate::core::config::Config;
use crate::core::errors::{LobbyError, Result};
use crate::core::units::format_gib;
use crate::engine::coordinator::{EngineSettings, FetchCoordinator};
use crate::engine::layout::{BarSplit, LayoutEngine, LayoutResult};
use crate::engine::registry::{CycleId, DriveEntry, DriveStatus};
use crate::engine::sink::{ChannelSink, FanoutSink, SinkEvent};
use crate::engine::summary::AggregateSummary;
use crate::logger::jsonl::{JsonlSink, JsonlWriter};
use crate::remote::rclone::RcloneSource;

/// Pixels per terminal column.
pub const CELL_PX_W: u32 = 8;
/// Pixels per terminal row.
pub const CELL_PX_H: u32 = 16;
/// Rows reserved for the header line.
const HEADER_ROWS: u16 = 1;
/// Rows reserved for the key hint footer.
const FOOTER_ROWS: u16 = 1;

// ──────────────────── bar rendering ────────────────────

/// Render a usage bar `cells` characters wide.
#[must_use]
pub fn render_bar(split: &BarSplit, cells: usize) -> String {
    match split {
        BarSplit::Neutral { .. } => "▒".repeat(cells),
        BarSplit::Split { .. } => {
            let used = (split.used_fraction() * cells as f64).round() as usize;
            let used = used.min(cells);
            format!("{}{}", "█".repeat(used), "░".repeat(cells - used))
        }
    }
}

/// Convert a pixel width to whole terminal cells.
#[must_use]
pub const fn px_to_cols(px: u32) -> u16 {
    let cols = px / CELL_PX_W;
    if cols > u16::MAX as u32 {
        u16::MAX
    } else {
        cols as u16
    }
}

/// Convert a pixel height to whole terminal rows.
#[must_use]
pub const fn px_to_rows(px: u32) -> u32 {
    px / CELL_PX_H
}

// ──────────────────── dashboard config ────────────────────

/// Configuration for the dashboard display.
pub struct DashboardConfig {
    /// Effective configuration (remotes, layout, debounce).
    pub config: Config,
    /// Record engine events as JSONL when set.
    pub event_log: Option<std::path::PathBuf>,
}

// ──────────────────── view state ────────────────────

/// Local mirror of the engine's published state.
#[derive(Debug, Default)]
pub struct DashboardView {
    pub cycle: CycleId,
    pub settled: bool,
    pub entries: Vec<DriveEntry>,
    pub summary: AggregateSummary,
    pub layout: Option<LayoutResult>,
    /// First content row shown (in terminal rows).
    pub scroll: u32,
}

impl DashboardView {
    /// Fold one engine event into the view. Returns whether a redraw is needed.
    pub fn apply(&mut self, event: SinkEvent) -> bool {
        match event {
            SinkEvent::CycleStarted { cycle } => {
                self.cycle = cycle;
                self.settled = false;
                self.entries.clear();
            }
            SinkEvent::EntryAppended { index, entry } => {
                if index == self.entries.len() {
                    self.entries.push(entry);
                } else if let Some(slot) = self.entries.get_mut(index) {
                    *slot = entry;
                }
            }
            SinkEvent::SummaryUpdated { summary } => self.summary = summary,
            SinkEvent::LayoutUpdated { layout } => {
                self.layout = Some(layout);
                self.scroll = self.scroll.min(self.content_rows().saturating_sub(1));
            }
            SinkEvent::CycleSettled { cycle } => {
                if cycle == self.cycle {
                    self.settled = true;
                }
            }
        }
        true
    }

    /// Content height in terminal rows.
    #[must_use]
    pub fn content_rows(&self) -> u32 {
        self.layout
            .as_ref()
            .map_or(0, |l| px_to_rows(l.scroll_extent).max(1))
    }

    /// Scroll by `delta` rows within a viewport of `viewport_rows`.
    pub fn scroll_by(&mut self, delta: i64, viewport_rows: u32) {
        let next = (i64::from(self.scroll) + delta).max(0);
        self.scroll = u32::try_from(next).unwrap_or(u32::MAX);
        self.clamp_scroll(viewport_rows);
    }

    fn clamp_scroll(&mut self, viewport_rows: u32) {
        let max = self.content_rows().saturating_sub(viewport_rows);
        self.scroll = self.scroll.min(max);
    }
}

// ──────────────────── main dashboard loop ────────────────────

/// Run the dashboard until the user exits (q/Ctrl-C/Esc).
pub fn run(config: &DashboardConfig) -> Result<()> {
    let mut stdout = io::stdout();
    let term_err = |e: io::Error| LobbyError::Runtime {
        details: format!("terminal: {e}"),
    };

    terminal::enable_raw_mode().map_err(term_err)?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(term_err)?;

    let result = run_inner(&mut stdout, config);

    // Always restore terminal state.
    let _ = execute!(stdout, Show, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();

    result
}

fn run_inner(stdout: &mut io::Stdout, config: &DashboardConfig) -> Result<()> {
    let term_err = |e: io::Error| LobbyError::Runtime {
        details: format!("terminal: {e}"),
    };
    let (cols, rows) = terminal::size().map_err(term_err)?;

    let (tx, rx) = unbounded();
    let mut sink = FanoutSink::new().with(Box::new(ChannelSink::new(tx)));
    if let Some(path) = &config.event_log {
        sink = sink.with(Box::new(JsonlSink::new(JsonlWriter::open(path))));
    }

    let settings = EngineSettings::from_config(&config.config, u32::from(cols) * CELL_PX_W);
    let engine = LayoutEngine::new(settings.layout.clone());
    let coordinator = FetchCoordinator::spawn(
        Arc::new(RcloneSource::from_config(&config.config.remotes)),
        Box::new(sink),
        settings,
    )?;
    coordinator.refresh();

    let mut view = DashboardView::default();
    let mut size = (cols, rows);
    let mut dirty = true;

    loop {
        dirty |= drain(&rx, &mut view);
        if dirty {
            render_frame(stdout, size, &view, &engine).map_err(term_err)?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(50)).map_err(term_err)? {
            continue;
        }
        let viewport = u32::from(size.1.saturating_sub(HEADER_ROWS + FOOTER_ROWS));
        match event::read().map_err(term_err)? {
            Event::Key(key) => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Char('r') => {
                    view.scroll = 0;
                    coordinator.refresh();
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    view.scroll_by(3, viewport);
                    dirty = true;
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    view.scroll_by(-3, viewport);
                    dirty = true;
                }
                KeyCode::PageDown => {
                    view.scroll_by(i64::from(viewport), viewport);
                    dirty = true;
                }
                KeyCode::PageUp => {
                    view.scroll_by(-i64::from(viewport), viewport);
                    dirty = true;
                }
                KeyCode::Home => {
                    view.scroll = 0;
                    dirty = true;
                }
                _ => {}
            },
            Event::Resize(new_cols, new_rows) => {
                size = (new_cols, new_rows);
                coordinator.resize(u32::from(new_cols) * CELL_PX_W);
                dirty = true;
            }
            _ => {}
        }
    }

    coordinator.shutdown();
    Ok(())
}

fn drain(rx: &Receiver<SinkEvent>, view: &mut DashboardView) -> bool {
    let mut changed = false;
    for event in rx.try_iter() {
        changed |= view.apply(event);
    }
    changed
}

// ──────────────────── frame rendering ────────────────────

fn render_frame(
    stdout: &mut io::Stdout,
    (cols, rows): (u16, u16),
    view: &DashboardView,
    engine: &LayoutEngine,
) -> io::Result<()> {
    queue!(stdout, MoveTo(0, 0), Clear(ClearType::All))?;

    // ── Header ──
    let status = if view.settled {
        "settled".to_string()
    } else {
        format!("{} pending", view.summary.pending_count())
    };
    let header = format!(" Drive Lobby  cycle {}  [{status}]", view.cycle);
    queue!(
        stdout,
        MoveTo(0, 0),
        SetForegroundColor(Color::Cyan),
        SetAttribute(Attribute::Bold)
    )?;
    write!(stdout, "{}", clip(&header, cols))?;
    queue!(stdout, SetAttribute(Attribute::Reset))?;

    let viewport = Viewport {
        top: HEADER_ROWS,
        rows: rows.saturating_sub(HEADER_ROWS + FOOTER_ROWS),
        cols,
        scroll: view.scroll,
    };

    if let Some(layout) = &view.layout {
        render_summary(stdout, &viewport, layout, &view.summary)?;
        for (placement, entry) in layout.tiles.iter().zip(&view.entries) {
            render_tile(stdout, &viewport, engine, placement, entry)?;
        }
    }

    // ── Footer ──
    queue!(
        stdout,
        MoveTo(0, rows.saturating_sub(1)),
        SetForegroundColor(Color::DarkGrey)
    )?;
    write!(
        stdout,
        "{}",
        clip(" r refresh  ↑/↓ scroll  q quit", cols)
    )?;
    queue!(stdout, SetAttribute(Attribute::Reset))?;

    stdout.flush()
}

/// Visible window into the pixel-space layout.
struct Viewport {
    top: u16,
    rows: u16,
    cols: u16,
    scroll: u32,
}

impl Viewport {
    /// Screen row for a content row, if visible.
    fn screen_row(&self, content_row: u32) -> Option<u16> {
        let rel = content_row.checked_sub(self.scroll)?;
        if rel >= u32::from(self.rows) {
            return None;
        }
        Some(self.top + rel as u16)
    }

    fn put(
        &self,
        stdout: &mut io::Stdout,
        col: u16,
        content_row: u32,
        text: &str,
        color: Color,
    ) -> io::Result<()> {
        let Some(row) = self.screen_row(content_row) else {
            return Ok(());
        };
        if col >= self.cols {
            return Ok(());
        }
        queue!(stdout, MoveTo(col, row), SetForegroundColor(color))?;
        write!(stdout, "{}", clip(text, self.cols - col))?;
        queue!(stdout, SetAttribute(Attribute::Reset))
    }
}

fn clip(text: &str, max_cols: u16) -> String {
    text.chars().take(usize::from(max_cols)).collect()
}

fn render_summary(
    stdout: &mut io::Stdout,
    vp: &Viewport,
    layout: &LayoutResult,
    summary: &AggregateSummary,
) -> io::Result<()> {
    let place = &layout.summary;
    let col = px_to_cols(place.x) + 1;
    let row = px_to_rows(place.y);

    vp.put(stdout, col, row, "Summary", Color::White)?;
    let lines = [
        format!("Total drives:  {}", summary.drive_count),
        format!("Total storage: {}", format_gib(summary.nominal_total_gib)),
        format!("Total used:    {}", format_gib(summary.total_used_gib)),
        format!("Total free:    {}", format_gib(summary.total_free_gib)),
    ];
    for (offset, line) in (1u32..).zip(lines.iter()) {
        vp.put(stdout, col, row + offset, line, Color::Grey)?;
    }
    let bar_cells = usize::from(px_to_cols(place.bar_width));
    vp.put(
        stdout,
        col,
        row + 6,
        &render_bar(&layout.summary_bar, bar_cells),
        Color::Blue,
    )?;
    if summary.pending_count() > 0 {
        vp.put(
            stdout,
            col,
            row + 7,
            &format!("waiting on {} remote(s)…", summary.pending_count()),
            Color::DarkGrey,
        )?;
    }
    Ok(())
}

fn render_tile(
    stdout: &mut io::Stdout,
    vp: &Viewport,
    engine: &LayoutEngine,
    placement: &crate::engine::layout::TilePlacement,
    entry: &DriveEntry,
) -> io::Result<()> {
    let col = px_to_cols(placement.x);
    let row = px_to_rows(placement.y);
    let inner = usize::from(px_to_cols(engine.geometry().tile_width)).saturating_sub(2);
    let tile_rows = px_to_rows(engine.geometry().tile_height).max(3);

    let edge = format!("+{}+", "-".repeat(inner));
    vp.put(stdout, col, row, &edge, Color::DarkGrey)?;
    vp.put(stdout, col, row + tile_rows - 1, &edge, Color::DarkGrey)?;

    let title = format!("{}) {}", placement.index + 1, entry.display_name());
    vp.put(stdout, col + 1, row + 1, &title, Color::White)?;

    match &entry.status {
        DriveStatus::Unreachable { .. } => {
            vp.put(stdout, col + 1, row + 2, "Cannot access", Color::Red)?;
        }
        DriveStatus::Reachable(stats) => {
            let lines = [
                format!("Total: {}", format_gib(stats.total_gib())),
                format!("Used:  {}", format_gib(stats.used_gib())),
                format!("Free:  {}", format_gib(stats.free_gib())),
            ];
            for (offset, line) in (2u32..).zip(lines.iter()) {
                vp.put(stdout, col + 1, row + offset, line, Color::Grey)?;
            }
            if let Some(bar) = engine.tile_bar(entry) {
                let cells = usize::from(px_to_cols(engine.tile_bar_width()));
                vp.put(stdout, col + 1, row + 6, &render_bar(&bar, cells), Color::Blue)?;
            }
        }
    }
    Ok(())
}
