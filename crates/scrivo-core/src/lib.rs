#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Scrivo Core Library
//!
//! Core types and errors shared by the durable runtime, the rate limiter,
//! and the transcription workflow.

pub mod error;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use types::{
    FailureRecord, InstanceKey, PipelineStatus, StatusResponse, StepName, StepRecord,
};
