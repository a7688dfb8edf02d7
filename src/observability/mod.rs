//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router, filters, dispatcher, pool produce:
//!     → tracing events (request_id on every request-scoped event)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
