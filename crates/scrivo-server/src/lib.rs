#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod error;

pub use app::{AppState, router, run_sweep, spawn_sweeper};
pub use config::ScrivoConfig;
pub use error::{ApiError, Error, Result};
