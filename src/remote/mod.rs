//! External collaborators: remote discovery and per-remote usage probes.

pub mod rclone;
pub mod source;
