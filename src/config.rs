//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{
    FixedWindowConfig, FixedWindowLimiter, Limiter, SlidingWindowConfig, SlidingWindowLimiter,
    TokenBucketConfig, TokenBucketLimiter,
};

/// Main configuration for the Ratekeeper server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8008))
}

/// Admission policy applied to rate limited routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Which limiter to build
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// Window length in milliseconds (fixed and sliding window)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests per window (fixed and sliding window)
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Bucket capacity (token bucket)
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u32,

    /// Refill period in milliseconds (token bucket)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Drop identifiers whose bucket is full after a refill (token bucket)
    #[serde(default)]
    pub evict_full_buckets: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            window_ms: default_window_ms(),
            threshold: default_threshold(),
            bucket_size: default_bucket_size(),
            refresh_interval_ms: default_refresh_interval_ms(),
            evict_full_buckets: false,
        }
    }
}

fn default_algorithm() -> Algorithm {
    Algorithm::TokenBucket
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_threshold() -> u32 {
    5
}

fn default_bucket_size() -> u32 {
    10
}

fn default_refresh_interval_ms() -> u64 {
    1_000
}

impl RateLimitingConfig {
    /// Fixed window parameters from `window_ms` and `threshold`.
    pub fn fixed_window(&self) -> FixedWindowConfig {
        FixedWindowConfig::new(Duration::from_millis(self.window_ms), self.threshold)
    }

    /// Sliding window parameters from `window_ms` and `threshold`.
    pub fn sliding_window(&self) -> SlidingWindowConfig {
        SlidingWindowConfig::new(Duration::from_millis(self.window_ms), self.threshold)
    }

    /// Token bucket parameters from `bucket_size`, `refresh_interval_ms` and `evict_full_buckets`.
    pub fn token_bucket(&self) -> TokenBucketConfig {
        TokenBucketConfig::new(self.bucket_size, Duration::from_millis(self.refresh_interval_ms))
            .with_eviction(self.evict_full_buckets)
    }

    /// Build the configured limiter.
    ///
    /// Timer-driven limiters start their background task here and stop it
    /// when `shutdown` is cancelled or the limiter is dropped.
    pub fn build_limiter(&self, shutdown: &CancellationToken) -> Result<Arc<dyn Limiter>> {
        let limiter: Arc<dyn Limiter> = match self.algorithm {
            Algorithm::FixedWindow => {
                Arc::new(FixedWindowLimiter::with_shutdown(self.fixed_window(), shutdown)?)
            }
            Algorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(self.sliding_window())?),
            Algorithm::TokenBucket => {
                Arc::new(TokenBucketLimiter::with_shutdown(self.token_bucket(), shutdown)?)
            }
        };

        info!(algorithm = ?self.algorithm, "Rate limiter initialized");
        Ok(limiter)
    }
}

impl RatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RatekeeperConfig::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8008".parse().unwrap());
        assert_eq!(config.rate_limiting.algorithm, Algorithm::TokenBucket);
        assert_eq!(
            config.rate_limiting.token_bucket(),
            TokenBucketConfig::new(10, Duration::from_secs(1))
        );
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  algorithm: fixed_window
  window_ms: 5000
  threshold: 2
"#;

        let config = RatekeeperConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.bind_addr, default_bind_addr());
        assert_eq!(config.rate_limiting.algorithm, Algorithm::FixedWindow);
        assert_eq!(
            config.rate_limiting.fixed_window(),
            FixedWindowConfig::new(Duration::from_secs(5), 2)
        );
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  bind_addr: "0.0.0.0:9000"
rate_limiting:
  algorithm: token_bucket
  bucket_size: 3
  refresh_interval_ms: 250
  evict_full_buckets: true
"#;

        let config = RatekeeperConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000".parse().unwrap());
        let bucket = config.rate_limiting.token_bucket();
        assert_eq!(bucket.bucket_size, 3);
        assert_eq!(bucket.refresh_interval, Duration::from_millis(250));
        assert!(bucket.evict_full_buckets);
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let yaml = "rate_limiting:\n  algorithm: leaky_bucket\n";
        let result = RatekeeperConfig::from_yaml(yaml);
        assert!(matches!(result, Err(RatekeeperError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = RatekeeperConfig::from_file("/nonexistent/ratekeeper.yaml");
        assert!(matches!(result, Err(RatekeeperError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_each_limiter() {
        let shutdown = CancellationToken::new();

        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow, Algorithm::TokenBucket] {
            let config = RateLimitingConfig {
                algorithm,
                threshold: 1,
                bucket_size: 1,
                window_ms: 60_000,
                refresh_interval_ms: 60_000,
                ..Default::default()
            };
            let limiter = config.build_limiter(&shutdown).unwrap();

            assert!(limiter.admit("client"), "{:?} should admit the first request", algorithm);
            assert!(!limiter.admit("client"), "{:?} should deny the second request", algorithm);
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_build_rejects_zero_window() {
        let config = RateLimitingConfig {
            algorithm: Algorithm::SlidingWindow,
            window_ms: 0,
            ..Default::default()
        };
        assert!(config.build_limiter(&CancellationToken::new()).is_err());
    }
}
