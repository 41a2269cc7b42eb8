//! KDL configuration parsing for the BuildIt job worker.
//!
//! This crate handles parsing of:
//! - Worker settings (interactive mode, update-in-place)
//! - Git failure classification rules

pub mod error;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use worker::{FailureKind, FailureRule, WorkerConfig, parse_worker_config};
