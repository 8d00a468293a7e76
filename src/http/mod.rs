//! HTTP middleware adapter.
//!
//! Resolves a client identifier for each request, asks a [`Limiter`] whether
//! it may proceed, and answers `429 Too Many Requests` when it may not.
//!
//! [`Limiter`]: crate::ratelimit::Limiter

mod client_ip;
mod layer;

pub use client_ip::{client_identifier, FORWARDED_FOR, REAL_IP};
pub use layer::{RateLimitLayer, RateLimitService};
