//! Ratekeeper - In-process Rate Limiting
//!
//! This crate answers "may this request proceed now?" for a client identifier
//! under one of three admission policies: fixed window, sliding window and
//! token bucket. Every limiter implements the [`Limiter`] trait, and the
//! [`http`] module wraps any of them as tower middleware that turns a denial
//! into `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use error::{RatekeeperError, Result};
pub use ratelimit::{
    FixedWindowConfig, FixedWindowLimiter, Limiter, SlidingWindowConfig, SlidingWindowLimiter,
    TokenBucketConfig, TokenBucketLimiter,
};
