//! JSONL event log: one self-contained JSON object per presentation event.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! concurrent `tail -f` never sees a partial line.
//!
//! Fallback chain:
//! 1. Configured file path (parent directories created on open)
//! 2. stderr with `[DLB-JSONL]` prefix
//! 3. Silent discard (the engine must never stall on logging)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::core::errors::{LobbyError, Result};
use crate::engine::layout::LayoutResult;
use crate::engine::registry::{CycleId, DriveEntry};
use crate::engine::sink::{PresentationSink, SinkEvent};
use crate::engine::summary::AggregateSummary;

/// Degradation state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    File,
    Stderr,
    Discard,
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a SinkEvent,
}

/// Append-only JSONL writer with graceful degradation.
pub struct JsonlWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    lines_written: u64,
}

impl JsonlWriter {
    /// Open `path` for appending, degrading to stderr on failure.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (writer, state) = match open_append(&path) {
            Ok(file) => (Some(BufWriter::new(file)), WriterState::File),
            Err(err) => {
                let _ = writeln!(
                    io::stderr(),
                    "[DLB-JSONL] cannot open {}: {err}; using stderr",
                    path.display()
                );
                (None, WriterState::Stderr)
            }
        };
        Self {
            path,
            writer,
            state,
            lines_written: 0,
        }
    }

    /// Open strictly: fail instead of degrading.
    pub fn open_strict(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path).map_err(|source| LobbyError::io(&path, source))?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            state: WriterState::File,
            lines_written: 0,
        })
    }

    /// Write one event stamped with the current UTC time.
    pub fn write_event(&mut self, event: &SinkEvent) {
        let line = Line {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        match serde_json::to_string(&line) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[DLB-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut()
            && w.flush().is_err()
        {
            self.degrade();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::File => "file",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::File => {
                let ok = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if ok {
                    self.lines_written += 1;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[DLB-JSONL] {line}").is_ok() {
                    self.lines_written += 1;
                } else {
                    self.state = WriterState::Discard;
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::File => WriterState::Stderr,
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Presentation sink that records every event to a [`JsonlWriter`].
pub struct JsonlSink {
    writer: JsonlWriter,
}

impl JsonlSink {
    #[must_use]
    pub const fn new(writer: JsonlWriter) -> Self {
        Self { writer }
    }

    fn record(&mut self, event: &SinkEvent) {
        self.writer.write_event(event);
    }
}

impl PresentationSink for JsonlSink {
    fn on_entry_appended(&mut self, index: usize, entry: &DriveEntry) {
        self.record(&SinkEvent::EntryAppended {
            index,
            entry: entry.clone(),
        });
    }

    fn on_summary_updated(&mut self, summary: &AggregateSummary) {
        self.record(&SinkEvent::SummaryUpdated { summary: *summary });
    }

    fn on_layout_updated(&mut self, layout: &LayoutResult) {
        self.record(&SinkEvent::LayoutUpdated {
            layout: layout.clone(),
        });
    }

    fn on_cycle_started(&mut self, cycle: CycleId) {
        self.record(&SinkEvent::CycleStarted { cycle });
    }

    fn on_cycle_settled(&mut self, cycle: CycleId) {
        self.record(&SinkEvent::CycleSettled { cycle });
        self.writer.flush();
        log::debug!(
            "event log {}: {} lines after cycle {cycle}",
            self.writer.path().display(),
            self.writer.lines_written()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn writes_one_tagged_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/events.jsonl");
        {
            let mut sink = JsonlSink::new(JsonlWriter::open_strict(&path).expect("open"));
            sink.on_cycle_started(1);
            sink.on_entry_appended(0, &DriveEntry::unreachable("a:", "exit 1"));
            sink.on_cycle_settled(1);
        }

        let raw = fs::read_to_string(&path).expect("read");
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "cycle_started");
        assert_eq!(lines[0]["cycle"], 1);
        assert!(lines[0]["ts"].as_str().is_some_and(|ts| ts.ends_with('Z')));
        assert_eq!(lines[1]["event"], "entry_appended");
        assert_eq!(lines[1]["entry"]["status"]["state"], "unreachable");
        assert_eq!(lines[2]["event"], "cycle_settled");
    }

    #[test]
    fn appends_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        for cycle in 1..=2 {
            let mut writer = JsonlWriter::open(&path);
            writer.write_event(&SinkEvent::CycleStarted { cycle });
            assert_eq!(writer.state(), "file");
            assert_eq!(writer.lines_written(), 1);
        }
        let raw = fs::read_to_string(&path).expect("read");
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn unopenable_path_degrades_to_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let writer = JsonlWriter::open(dir.path());
        assert_eq!(writer.state(), "stderr");
        assert!(JsonlWriter::open_strict(dir.path()).is_err());
    }
}
