//! Append-only JSONL recording of presentation events.

pub mod jsonl;
