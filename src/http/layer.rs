//! Tower layer enforcing a [`Limiter`] in front of an HTTP service.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, trace};

use super::client_ip::client_identifier;
use crate::ratelimit::Limiter;

/// Rate limiting layer for Tower.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn Limiter>,
}

impl RateLimitLayer {
    /// Create a new rate limit layer around a shared limiter.
    pub fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self { limiter }
    }

    /// Create a layer that owns `limiter`.
    pub fn from_limiter<L: Limiter + 'static>(limiter: L) -> Self {
        Self::new(Arc::new(limiter))
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service.
///
/// Denied requests get an empty `429 Too Many Requests` and never reach the
/// inner service; admitted requests are forwarded unchanged.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn Limiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        let identifier = client_identifier(request.headers(), remote_addr);

        if !self.limiter.admit(&identifier) {
            debug!(
                identifier = %identifier,
                path = %request.uri().path(),
                "Request rate limited"
            );
            return Box::pin(async { Ok(StatusCode::TOO_MANY_REQUESTS.into_response()) });
        }

        trace!(identifier = %identifier, "Request admitted");

        // Call the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(request))
    }
}
