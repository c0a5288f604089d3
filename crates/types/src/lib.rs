// crates/types/src/lib.rs
//! Typed data model and wire payloads shared by every nanocas-view crate.
//!
//! All untyped JSON coming off the network is converted here, once. Nothing
//! past this crate sees a `serde_json::Value` for coverage or session data.

pub mod coverage;
pub mod error;
pub mod events;
pub mod session;
pub mod setup;
pub mod time;

pub use coverage::*;
pub use error::*;
pub use events::*;
pub use session::*;
pub use setup::*;
pub use time::*;
