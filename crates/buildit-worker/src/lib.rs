//! Per-job coordinator for the BuildIt CI worker.
//!
//! A [`Job`] synchronizes its working directory with the repository,
//! multiplexes the output of everything it runs into one ordered stream and
//! reports progress and completion to the job queue.

pub mod classify;
pub mod context;
pub mod format;
pub mod git;
pub mod job;
pub mod launch;
pub mod logger;
pub mod output;
pub mod queue;
pub mod reporter;
pub mod resolve;

pub use classify::{FailureClassifier, Verdict};
pub use context::{JobContext, StageSignal};
pub use format::FormatterTable;
pub use git::{SyncError, SyncPlan};
pub use job::{Job, JobBuilder};
pub use launch::{LaunchRequest, Launcher};
pub use logger::{JobLogger, TracingLogger};
pub use output::{Buffers, OutputBuffers};
pub use queue::{BroadcastQueue, QueueEvent};
pub use reporter::Reporter;
pub use resolve::{GithubUrlResolver, HintParser, RepoUrls, TagHintParser, UrlResolver};
