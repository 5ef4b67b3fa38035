//! Simulated stock market tick job.
//!
//! Every tick, each ticker in a fixed universe takes one random-walk step.
//! Moved prices are written to every configured storage backend, together
//! with a history record, and expired history is pruned. Ticks are paced
//! by a persisted `{enabled, lastTick}` record.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod repo;
pub mod report;
pub mod state;
pub mod types;
