//! Core types: errors, configuration, unit conversion.

pub mod config;
pub mod errors;
pub mod units;
