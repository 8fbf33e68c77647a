#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Scrivo Durable Library
//!
//! Replay-based durable execution: state, steps, promises and actors.

pub mod clock;
pub mod context;
pub mod locks;
pub mod promise;
pub mod retry;
pub mod runtime;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Journal, JournalWrite, ObjectContext, SharedContext, WorkflowContext};
pub use promise::{DurablePromise, PromiseRecord};
pub use retry::RetryPolicy;
pub use runtime::{DurableRuntime, Invocation, RuntimeBuilder, Workflow};
pub use store::{InMemoryStateStore, Mutation, RedbStateStore, Scope, StateStore};

// Re-export core types
pub use scrivo_core::{Error, Result};
