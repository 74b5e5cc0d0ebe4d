//! Stream discovery for cameras reached by bare host or URL.
//!
//! [`CandidateGenerator`] expands a target into plausible stream URLs, [`TieredProber`]
//! verifies one candidate cheaply first and by decoding only when needed, and
//! [`ProbeScheduler`] drives the prober over the list with bounded concurrency.

pub mod candidates;
pub mod classify;
pub mod config;
pub mod deep;
pub mod http;
pub mod prober;
pub mod rtsp;
pub mod scheduler;
pub mod types;

pub use candidates::{CandidateError, CandidateGenerator, MAX_CANDIDATES};
pub use config::ProbeConfig;
pub use deep::DeepProbeTool;
pub use prober::{DeepCheck, LightweightCheck, NetworkCheck, Prober, TieredProber};
pub use scheduler::ProbeScheduler;
pub use types::*;
