//! Admin/Config Surface (§4.J): YAML configuration parsing and validation,
//! and Prometheus metrics exposition. Normalizes server-wide settings that
//! the other components (A-G) are constructed from.

mod config;
mod metrics;

pub use alyx_metrics::normalize_path;
pub use config::{AlyxConfig, DevConfig, EventsSection, FunctionsConfig, ServerConfig};
pub use metrics::export;
