//! Process runners for BuildIt jobs.
//!
//! Provides runner implementations for job commands:
//! - Local processes spawned with `tokio::process`

pub mod local;

pub use buildit_core::executor::{Echo, ExitOutcome, GitLaunch, Launch, ProcessRunner};
pub use local::LocalRunner;
