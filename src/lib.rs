//! Camera connectivity bridge.
//!
//! Stream discovery lives in [`stream_probe`], the device session orchestrator, playback
//! token issuer and HTTP surface live in [`device_bridge`].

pub use common;
pub use device_bridge;
pub use stream_probe;
pub use telemetry;
