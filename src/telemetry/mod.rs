//! Telemetry module
//!
//! Structured logging via `tracing`

mod logging;

pub use logging::init_logging;
