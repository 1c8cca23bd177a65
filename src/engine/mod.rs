//! Fetch-and-aggregate engine: cycle-scoped registry, summary rollup, grid
//! layout, resize debouncing, and the owner thread that ties them together.

pub mod coordinator;
pub mod debounce;
pub mod layout;
pub mod registry;
pub mod sink;
pub mod summary;
