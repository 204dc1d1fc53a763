//! Request logging and per-endpoint metrics, keyed with session ids collapsed.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;