//! Infrastructure - configuration, logging and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults, API key)
//! - `logging` - Console and per-run file tracing
//! - `metrics` - Lock-free harvest counters

pub mod config;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use metrics::{CallKind, HarvestMetrics, HarvestSummary};
