#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixed_window;
pub mod token_bucket;

pub use fixed_window::{RateLimitPolicy, RateLimiter, WindowState};
pub use token_bucket::{
    AllowRequest, BucketState, Reservation, ReserveRequest, SetRateRequest, TokenBucket,
};
