#![forbid(unsafe_code)]

//! drive_lobby — live capacity overview for rclone remotes.
//!
//! A refresh discovers the configured remotes, probes each one on its own
//! thread, and feeds results (in completion order) to a single owner thread
//! that maintains:
//! 1. **Drive registry** — one entry per remote, reachable or not
//! 2. **Aggregate summary** — drive count, nominal capacity, used/free totals
//! 3. **Grid layout** — responsive tile placement plus the summary panel
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drive_lobby::prelude::*;
//!
//! let config = Config::load(None)?;
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let coordinator = FetchCoordinator::spawn(
//!     Arc::new(RcloneSource::from_config(&config.remotes)),
//!     Box::new(ChannelSink::new(tx)),
//!     EngineSettings::from_config(&config, 1100),
//! )?;
//! coordinator.refresh();
//! for event in rx.iter() {
//!     if matches!(event, SinkEvent::CycleSettled { .. }) {
//!         break;
//!     }
//! }
//! # Ok::<(), drive_lobby::core::errors::LobbyError>(())
//! ```

pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod engine;
pub mod logger;
pub mod remote;
