//! Core types for Scrivo workflows.

mod ids;
mod proptests;
mod status;
mod step_record;

pub use ids::{InstanceKey, StepName, KEY_SEPARATOR};
pub use status::{PipelineStatus, StatusResponse};
pub use step_record::{FailureRecord, StepRecord};
