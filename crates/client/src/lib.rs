//! Runtime half of the nanocas session view.
//!
//! [`channel`] keeps the shared event channel to the analysis server,
//! [`api`] wraps its HTTP pull endpoints, [`poller`] drives the periodic
//! pulls, and [`view`] ties them to the synchronous state in
//! `nanocas-view-core` for one mounted session.

pub mod api;
pub mod channel;
pub mod config;
pub mod poller;
pub mod view;

pub use api::{AnalysisApi, ApiError, HttpAnalysisApi};
pub use channel::{ChannelError, Envelope, EventChannel, Subscription};
pub use config::ClientConfig;
pub use poller::{PollUpdate, PollerHandle, SessionPoller};
pub use view::{ActionError, Redirect, RemovalPrompt, SessionView, ViewSnapshot};
