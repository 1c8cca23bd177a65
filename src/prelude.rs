//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use drive_lobby::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{LobbyError, Result};
pub use crate::core::units::{format_gib, to_display_unit};

// Remote collaborators
pub use crate::remote::rclone::RcloneSource;
pub use crate::remote::source::{
    MockRemoteSource, RemoteDiscovery, RemoteProbe, RemoteSource, RemoteUsage,
};

// Engine
pub use crate::engine::coordinator::{EngineSettings, EngineSnapshot, FetchCoordinator};
pub use crate::engine::debounce::ResizeDebouncer;
pub use crate::engine::layout::{BarSplit, LayoutEngine, LayoutResult, compute_usage_bar_split};
pub use crate::engine::registry::{CycleId, DriveEntry, DriveRegistry, DriveStats, DriveStatus};
pub use crate::engine::sink::{ChannelSink, FanoutSink, PresentationSink, SinkEvent};
pub use crate::engine::summary::AggregateSummary;

// Logging
pub use crate::logger::jsonl::{JsonlSink, JsonlWriter};
