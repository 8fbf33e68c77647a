#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cleanup;
pub mod config;
pub mod transcription;

pub use cleanup::{CleanupReport, MAX_REPORTED_ERRORS, sweep_older_than};
pub use config::WorkflowConfig;
pub use transcription::{
    RESULT_PROMISE, TranscriptionJob, TranscriptionOutput, TranscriptionService,
    TranscriptionWorkflow,
};

// Re-export core types
pub use scrivo_core::{Error, Result};
