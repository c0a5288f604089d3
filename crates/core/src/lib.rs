// crates/core/src/lib.rs
//! Synchronization and visualization core for the nanocas session view.
//!
//! Everything in this crate is synchronous and side-effect free: the runtime
//! crate feeds it events and snapshots, and reads back state and matrices.
pub mod chart;
pub mod coverage_index;
pub mod error;
pub mod listener;
pub mod match_chart;

pub use chart::*;
pub use coverage_index::*;
pub use error::*;
pub use listener::*;
pub use match_chart::*;
