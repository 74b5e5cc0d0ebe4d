pub mod ingest;
pub mod playback;
pub mod transport;

pub use ingest::IngestState;
pub use playback::PlaybackTarget;
pub use transport::Transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
