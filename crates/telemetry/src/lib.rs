pub mod correlation;
pub mod http_tracing;
pub mod logging;
pub mod metrics;

pub use correlation::{CorrelationId, X_CORRELATION_ID, X_REQUEST_ID};
pub use http_tracing::trace_http_request;
pub use logging::{init_structured_logging, LogConfig, LogFormat};
