//! Logging and metrics for Orbit services
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("orbit", LogFormat::Json)?;
//! observability::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, MatchOutcome, MatchTimer};
