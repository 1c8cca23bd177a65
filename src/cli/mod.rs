//! Terminal front-ends built on the engine.

pub mod dashboard;
