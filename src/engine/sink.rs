//! Presentation sink: the engine's observable output contract.
//!
//! The owner thread is the only caller, so implementations need `Send` but not
//! `Sync`, and may keep mutable state without locking.

#![allow(missing_docs)]

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::engine::layout::LayoutResult;
use crate::engine::registry::{CycleId, DriveEntry};
use crate::engine::summary::AggregateSummary;

/// Receives engine updates in the order the owner applies them.
pub trait PresentationSink: Send {
    /// A probe result was appended at `index` (completion order).
    fn on_entry_appended(&mut self, index: usize, entry: &DriveEntry);
    fn on_summary_updated(&mut self, summary: &AggregateSummary);
    fn on_layout_updated(&mut self, layout: &LayoutResult);

    /// A refresh began; previous entries are gone.
    fn on_cycle_started(&mut self, _cycle: CycleId) {}

    /// Every discovered remote of `cycle` has an entry.
    fn on_cycle_settled(&mut self, _cycle: CycleId) {}
}

/// Owned copy of one sink call, for channel and log transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    CycleStarted { cycle: CycleId },
    EntryAppended { index: usize, entry: DriveEntry },
    SummaryUpdated { summary: AggregateSummary },
    LayoutUpdated { layout: LayoutResult },
    CycleSettled { cycle: CycleId },
}

/// Forwards every sink call over a crossbeam channel.
///
/// Sends to a dropped receiver are ignored; the engine keeps running.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
}

impl ChannelSink {
    #[must_use]
    pub const fn new(tx: Sender<SinkEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: SinkEvent) {
        let _ = self.tx.send(event);
    }
}

impl PresentationSink for ChannelSink {
    fn on_entry_appended(&mut self, index: usize, entry: &DriveEntry) {
        self.forward(SinkEvent::EntryAppended {
            index,
            entry: entry.clone(),
        });
    }

    fn on_summary_updated(&mut self, summary: &AggregateSummary) {
        self.forward(SinkEvent::SummaryUpdated { summary: *summary });
    }

    fn on_layout_updated(&mut self, layout: &LayoutResult) {
        self.forward(SinkEvent::LayoutUpdated {
            layout: layout.clone(),
        });
    }

    fn on_cycle_started(&mut self, cycle: CycleId) {
        self.forward(SinkEvent::CycleStarted { cycle });
    }

    fn on_cycle_settled(&mut self, cycle: CycleId) {
        self.forward(SinkEvent::CycleSettled { cycle });
    }
}

/// Broadcasts to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn PresentationSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Box<dyn PresentationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl PresentationSink for FanoutSink {
    fn on_entry_appended(&mut self, index: usize, entry: &DriveEntry) {
        for sink in &mut self.sinks {
            sink.on_entry_appended(index, entry);
        }
    }

    fn on_summary_updated(&mut self, summary: &AggregateSummary) {
        for sink in &mut self.sinks {
            sink.on_summary_updated(summary);
        }
    }

    fn on_layout_updated(&mut self, layout: &LayoutResult) {
        for sink in &mut self.sinks {
            sink.on_layout_updated(layout);
        }
    }

    fn on_cycle_started(&mut self, cycle: CycleId) {
        for sink in &mut self.sinks {
            sink.on_cycle_started(cycle);
        }
    }

    fn on_cycle_settled(&mut self, cycle: CycleId) {
        for sink in &mut self.sinks {
            sink.on_cycle_settled(cycle);
        }
    }
}
