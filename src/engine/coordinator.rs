//! Fetch coordinator: fan-out probing with a single owner of all view state.
//!
//! Architecture: one **owner** thread holds the [`DriveRegistry`], the current
//! [`AggregateSummary`] and [`LayoutResult`], and is the only code that mutates
//! them or calls the [`PresentationSink`]. Everything else talks to it through
//! one unbounded crossbeam channel:
//! - the handle ([`FetchCoordinator`]) sends refresh/resize/snapshot requests,
//! - a discovery thread per cycle sends the remote list,
//! - one probe thread per remote sends exactly one `EntryReady`.
//!
//! Worker messages carry the cycle id they were spawned for; the registry
//! refuses anything from a superseded cycle. Timers (resize debounce and the
//! optional auto-refresh) are served by the owner's `recv_deadline`, so a
//! resize-driven recompute can never interleave with a probe-driven one.

#![allow(missing_docs)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use serde::Serialize;

use crate::core::config::{Config, LayoutConfig};
use crate::core::errors::{LobbyError, Result};
use crate::engine::debounce::ResizeDebouncer;
use crate::engine::layout::{LayoutEngine, LayoutResult};
use crate::engine::registry::{AppendRejection, CycleId, DriveEntry, DriveRegistry};
use crate::engine::sink::PresentationSink;
use crate::engine::summary::{self, AggregateSummary};
use crate::remote::source::{RemoteSource, dedup_remote_names};

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine knobs derived from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub layout: LayoutConfig,
    pub nominal_gib_per_drive: f64,
    pub resize_quiet: Duration,
    pub auto_refresh: Option<Duration>,
    /// Container width used until the first resize arrives.
    pub initial_width: u32,
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(config: &Config, initial_width: u32) -> Self {
        Self {
            layout: config.layout.clone(),
            nominal_gib_per_drive: config.summary.nominal_gib_per_drive,
            resize_quiet: config.debounce.resize_quiet(),
            auto_refresh: config.remotes.auto_refresh(),
            initial_width,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), 1100)
    }
}

/// Point-in-time copy of the owner's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub cycle: CycleId,
    pub container_width: u32,
    pub discovered: Vec<String>,
    pub entries: Vec<DriveEntry>,
    pub summary: AggregateSummary,
    pub layout: LayoutResult,
    /// Discovery for this cycle has reported.
    pub discovery_done: bool,
    pub settled: bool,
    /// A resize is waiting out the debounce quiet period.
    pub resize_pending: bool,
}

enum OwnerMsg {
    Refresh,
    Resize(u32),
    Discovered {
        cycle: CycleId,
        remotes: Vec<String>,
    },
    EntryReady {
        cycle: CycleId,
        entry: DriveEntry,
    },
    Snapshot(Sender<EngineSnapshot>),
    Shutdown,
}

/// Handle to a running engine. Dropping it stops the owner thread.
pub struct FetchCoordinator {
    tx: Sender<OwnerMsg>,
    owner: Option<JoinHandle<()>>,
}

impl FetchCoordinator {
    /// Start the owner thread. No refresh is issued until [`Self::refresh`].
    pub fn spawn(
        source: Arc<dyn RemoteSource>,
        sink: Box<dyn PresentationSink>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let (tx, rx) = unbounded::<OwnerMsg>();
        let mut owner = Owner::new(source, sink, settings, tx.clone());
        let handle = thread::Builder::new()
            .name("dlb-owner".to_string())
            .spawn(move || owner.run(&rx))
            .map_err(|e| LobbyError::Runtime {
                details: format!("failed to spawn owner thread: {e}"),
            })?;
        Ok(Self {
            tx,
            owner: Some(handle),
        })
    }

    /// Start a new discovery-and-probe cycle, superseding any in flight.
    pub fn refresh(&self) {
        self.post(OwnerMsg::Refresh);
    }

    /// Report a new container width; applied after the debounce quiet period.
    pub fn resize(&self, width: u32) {
        self.post(OwnerMsg::Resize(width));
    }

    /// Ask the owner for a copy of its current state.
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(OwnerMsg::Snapshot(reply_tx))
            .map_err(|_| LobbyError::ChannelClosed { component: "owner" })?;
        reply_rx
            .recv_timeout(SNAPSHOT_TIMEOUT)
            .map_err(|_| LobbyError::ChannelClosed { component: "owner" })
    }

    /// Stop the owner thread and wait for it. Probe threads still running are
    /// detached; their results are discarded.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn post(&self, msg: OwnerMsg) {
        if self.tx.send(msg).is_err() {
            log::error!("engine owner thread is gone; request dropped");
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.owner.take() {
            let _ = self.tx.send(OwnerMsg::Shutdown);
            if handle.join().is_err() {
                log::error!("engine owner thread panicked");
            }
        }
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

// ──────────────────── owner ────────────────────

struct Owner {
    source: Arc<dyn RemoteSource>,
    sink: Box<dyn PresentationSink>,
    worker_tx: Sender<OwnerMsg>,
    registry: DriveRegistry,
    summary: AggregateSummary,
    layout: LayoutResult,
    engine: LayoutEngine,
    debouncer: ResizeDebouncer,
    width: u32,
    nominal_gib_per_drive: f64,
    auto_refresh: Option<Duration>,
    next_auto_refresh: Option<Instant>,
}

impl Owner {
    fn new(
        source: Arc<dyn RemoteSource>,
        sink: Box<dyn PresentationSink>,
        settings: EngineSettings,
        worker_tx: Sender<OwnerMsg>,
    ) -> Self {
        let engine = LayoutEngine::new(settings.layout);
        let registry = DriveRegistry::new();
        let summary = summary::recompute(&registry, settings.nominal_gib_per_drive);
        let layout = engine.compute_grid(settings.initial_width, 0, &summary);
        Self {
            source,
            sink,
            worker_tx,
            registry,
            summary,
            layout,
            engine,
            debouncer: ResizeDebouncer::new(settings.resize_quiet),
            width: settings.initial_width,
            nominal_gib_per_drive: settings.nominal_gib_per_drive,
            auto_refresh: settings.auto_refresh,
            next_auto_refresh: None,
        }
    }

    fn run(&mut self, rx: &Receiver<OwnerMsg>) {
        log::debug!("engine owner started");
        loop {
            let msg = match self.next_timer() {
                Some(at) => match rx.recv_deadline(at) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => break,
                },
            };

            match msg {
                Some(OwnerMsg::Shutdown) => break,
                Some(msg) => self.handle(msg),
                None => {}
            }
            self.fire_timers(Instant::now());
        }
        log::debug!("engine owner stopped at cycle {}", self.registry.cycle());
    }

    fn next_timer(&self) -> Option<Instant> {
        match (self.debouncer.next_deadline(), self.next_auto_refresh) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        if let Some(width) = self.debouncer.poll(now) {
            log::trace!("debounced resize fired: width={width}");
            self.width = width;
            self.publish();
        }
        if self.next_auto_refresh.is_some_and(|at| now >= at) {
            log::debug!("auto-refresh due");
            self.start_cycle();
        }
    }

    fn handle(&mut self, msg: OwnerMsg) {
        match msg {
            OwnerMsg::Refresh => self.start_cycle(),
            OwnerMsg::Resize(width) => self.debouncer.notify_resize(width, Instant::now()),
            OwnerMsg::Discovered { cycle, remotes } => self.on_discovered(cycle, remotes),
            OwnerMsg::EntryReady { cycle, entry } => self.on_entry(cycle, entry),
            OwnerMsg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            OwnerMsg::Shutdown => {}
        }
    }

    fn start_cycle(&mut self) {
        let cycle = self.registry.begin_cycle();
        self.next_auto_refresh = self.auto_refresh.map(|period| Instant::now() + period);
        log::debug!("refresh cycle {cycle} started");
        self.sink.on_cycle_started(cycle);
        self.publish();

        let source = Arc::clone(&self.source);
        let tx = self.worker_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("dlb-discover-{cycle}"))
            .spawn(move || {
                let remotes = catch_unwind(AssertUnwindSafe(|| source.list_remotes()))
                    .unwrap_or_else(|_| {
                        log::warn!("remote discovery panicked; treating as no remotes");
                        Vec::new()
                    });
                let _ = tx.send(OwnerMsg::Discovered {
                    cycle,
                    remotes: dedup_remote_names(remotes),
                });
            });
        if let Err(err) = spawned {
            log::warn!("failed to spawn discovery thread: {err}; treating as no remotes");
            self.on_discovered(cycle, Vec::new());
        }
    }

    fn on_discovered(&mut self, cycle: CycleId, remotes: Vec<String>) {
        if !self.registry.set_discovered(cycle, remotes.clone()) {
            log::trace!("dropping discovery from superseded cycle {cycle}");
            return;
        }
        log::debug!("cycle {cycle}: discovered {} remote(s)", remotes.len());
        self.publish();
        if remotes.is_empty() {
            self.sink.on_cycle_settled(cycle);
            return;
        }

        for name in remotes {
            let source = Arc::clone(&self.source);
            let tx = self.worker_tx.clone();
            let thread_name = format!("dlb-probe-{}", thread_label(&name));
            let remote = name.clone();
            let spawned = thread::Builder::new().name(thread_name).spawn(move || {
                let entry = probe_entry(source.as_ref(), &remote);
                let _ = tx.send(OwnerMsg::EntryReady { cycle, entry });
            });
            if let Err(err) = spawned {
                log::warn!("failed to spawn probe thread for {name}: {err}");
                self.on_entry(
                    cycle,
                    DriveEntry::unreachable(name, format!("probe not started: {err}")),
                );
            }
        }
    }

    fn on_entry(&mut self, cycle: CycleId, entry: DriveEntry) {
        match self.registry.append(cycle, entry) {
            Ok(index) => {
                if let Some(entry) = self.registry.entries().get(index) {
                    self.sink.on_entry_appended(index, entry);
                }
                self.publish();
                if self.registry.is_settled() {
                    log::debug!("cycle {cycle} settled with {} entries", self.registry.len());
                    self.sink.on_cycle_settled(cycle);
                }
            }
            Err(AppendRejection::StaleCycle) => {
                log::trace!("dropping probe result from superseded cycle {cycle}");
            }
            Err(reason) => {
                log::debug!("probe result refused in cycle {cycle}: {reason:?}");
            }
        }
    }

    /// Recompute summary then layout from the current registry and width.
    fn publish(&mut self) {
        self.summary = summary::recompute(&self.registry, self.nominal_gib_per_drive);
        self.layout = self
            .engine
            .compute_grid(self.width, self.registry.len(), &self.summary);
        self.sink.on_summary_updated(&self.summary);
        self.sink.on_layout_updated(&self.layout);
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            cycle: self.registry.cycle(),
            container_width: self.width,
            discovered: self.registry.discovered().to_vec(),
            entries: self.registry.entries().to_vec(),
            summary: self.summary,
            layout: self.layout.clone(),
            discovery_done: self.registry.is_discovered(),
            settled: self.registry.is_settled(),
            resize_pending: self.debouncer.is_pending(),
        }
    }
}

/// Remote names are user data; thread names may not hold NUL or control bytes.
fn thread_label(name: &str) -> String {
    name.chars().filter(|c| !c.is_control()).collect()
}

/// Run one probe, folding every failure mode into an unreachable entry.
fn probe_entry(source: &dyn RemoteSource, remote: &str) -> DriveEntry {
    match catch_unwind(AssertUnwindSafe(|| source.describe(remote))) {
        Ok(Ok(usage)) => DriveEntry::reachable(remote, usage.into_stats()),
        Ok(Err(err)) => {
            log::warn!("remote {remote} unreachable: {err}");
            DriveEntry::unreachable(remote, err.to_string())
        }
        Err(_) => {
            log::warn!("probe for {remote} panicked");
            DriveEntry::unreachable(remote, "probe panicked")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::BYTES_PER_GIB;
    use crate::engine::registry::DriveStatus;
    use crate::engine::sink::{ChannelSink, SinkEvent};
    use crate::remote::source::{MockRemoteSource, RemoteUsage};

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_with(source: MockRemoteSource) -> (FetchCoordinator, Receiver<SinkEvent>) {
        let (tx, rx) = unbounded();
        let coordinator = FetchCoordinator::spawn(
            Arc::new(source),
            Box::new(ChannelSink::new(tx)),
            EngineSettings::default(),
        )
        .expect("spawn");
        (coordinator, rx)
    }

    fn wait_settled(rx: &Receiver<SinkEvent>) -> Vec<SinkEvent> {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv_timeout(WAIT).expect("engine settles");
            let done = matches!(event, SinkEvent::CycleSettled { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn gib_usage(total: u64, used: u64, free: u64) -> RemoteUsage {
        RemoteUsage {
            total: total * BYTES_PER_GIB,
            used: used * BYTES_PER_GIB,
            other: 0,
            free: free * BYTES_PER_GIB,
        }
    }

    #[test]
    fn mixed_success_and_failure_settles() {
        let source = MockRemoteSource::new()
            .with_usage("remote-a:", gib_usage(10, 4, 6), Duration::from_millis(5))
            .with_failure("remote-b:", "exit status 1", Duration::from_millis(1));
        let (coordinator, rx) = spawn_with(source);
        coordinator.refresh();
        let events = wait_settled(&rx);

        let appended = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::EntryAppended { .. }))
            .count();
        assert_eq!(appended, 2);

        let snap = coordinator.snapshot().expect("snapshot");
        assert!(snap.settled);
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(snap.summary.drive_count, 2);
        assert!((snap.summary.total_used_gib - 4.0).abs() < f64::EPSILON);
        assert!((snap.summary.total_free_gib - 6.0).abs() < f64::EPSILON);
        assert!((snap.summary.nominal_total_gib - 30.0).abs() < f64::EPSILON);
        coordinator.shutdown();
    }

    #[test]
    fn empty_discovery_settles_without_probes() {
        let (coordinator, rx) = spawn_with(MockRemoteSource::new());
        coordinator.refresh();
        wait_settled(&rx);
        let snap = coordinator.snapshot().expect("snapshot");
        assert!(snap.discovery_done);
        assert!(snap.entries.is_empty());
        assert_eq!(snap.summary.drive_count, 0);
        assert_eq!(snap.layout.tiles.len(), 0);
    }

    #[test]
    fn resize_is_debounced_to_last_width() {
        let source = MockRemoteSource::new();
        let (coordinator, rx) = spawn_with(source);
        for width in [700, 800, 900, 1400] {
            coordinator.resize(width);
        }
        let early = coordinator.snapshot().expect("snapshot");
        assert!(early.resize_pending);
        assert_eq!(early.container_width, 1100);

        let layouts: Vec<LayoutResult> = rx
            .iter()
            .filter_map(|e| match e {
                SinkEvent::LayoutUpdated { layout } => Some(layout),
                _ => None,
            })
            .take(1)
            .collect();
        assert_eq!(layouts[0].container_width, 1400);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        let settled = coordinator.snapshot().expect("snapshot");
        assert_eq!(settled.container_width, 1400);
        assert!(!settled.resize_pending);
    }

    #[test]
    fn panicking_remote_becomes_unreachable() {
        let source = MockRemoteSource::new()
            .with_usage("ok:", gib_usage(10, 4, 6), Duration::from_millis(5))
            .with_panic("boom:", Duration::from_millis(1));
        let (coordinator, rx) = spawn_with(source);
        coordinator.refresh();
        wait_settled(&rx);

        let snap = coordinator.snapshot().expect("snapshot");
        assert!(snap.settled);
        let boom = snap.entries.iter().find(|e| e.name == "boom:").expect("boom entry");
        assert!(matches!(boom.status, DriveStatus::Unreachable { .. }));
        let ok = snap.entries.iter().find(|e| e.name == "ok:").expect("ok entry");
        assert!(matches!(ok.status, DriveStatus::Reachable(_)));
        assert_eq!(snap.summary.reachable_count, 1);
        assert_eq!(snap.summary.unreachable_count, 1);
    }

    #[test]
    fn control_bytes_in_remote_name_still_yield_an_entry() {
        let source = MockRemoteSource::new()
            .with_usage("bad\0name:", gib_usage(10, 1, 9), Duration::from_millis(1));
        let (coordinator, rx) = spawn_with(source);
        coordinator.refresh();
        wait_settled(&rx);

        let snap = coordinator.snapshot().expect("snapshot");
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].name, "bad\0name:");
        assert!(matches!(snap.entries[0].status, DriveStatus::Reachable(_)));
        assert_eq!(thread_label("bad\0na\nme:"), "badname:");
    }

    #[test]
    fn snapshot_fails_after_shutdown_of_owner() {
        let (mut coordinator, _rx) = spawn_with(MockRemoteSource::new());
        coordinator.stop();
        assert!(coordinator.snapshot().is_err());
    }
}
