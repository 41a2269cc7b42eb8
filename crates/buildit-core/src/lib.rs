//! Core domain types and traits for the BuildIt job worker.
//!
//! This crate contains:
//! - Job specification data model
//! - Lifecycle event payloads and the queue emitter seam
//! - The typed per-job event bus
//! - Launch descriptors and the process runner trait

pub mod bus;
pub mod error;
pub mod event;
pub mod executor;
pub mod job;

pub use error::{Error, Result};
