//! Tower middleware for request-issuing clients.
//!
//! [`RateLimitLayer`] asks a shared [`RateLimiter`] before every request. An extractor maps
//! each request to `(identifier, domain)`. Denied requests fail with
//! [`ThrottleError::RateLimited`] without reaching the inner service. With pacing enabled,
//! admitted requests first wait out a [`Pacer`] delay.
//!
//! ```rust
//! use pacekeeper::{RateLimitLayer, RateLimiter, RuleConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tower::{Layer, ServiceExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = Arc::new(RateLimiter::builder().build().await);
//! let rule: RuleConfig = serde_json::from_str(
//!     r#"{ "algorithm": "fixed-window", "tiers": [{ "name": "per-host", "maxRequests": 10, "windowMs": 1000 }] }"#,
//! ).unwrap();
//! limiter.register_rules("shop.example", rule).unwrap();
//!
//! let fetch = tower::service_fn(|url: String| async move {
//!     Ok::<_, std::io::Error>(format!("fetched {url}"))
//! });
//! let layer = RateLimitLayer::new(limiter.clone(), |url: &String| {
//!     ("crawler-1".to_string(), url.split('/').nth(2).unwrap_or_default().to_string())
//! })
//! .with_pacing(Duration::from_millis(10));
//!
//! let body = layer.layer(fetch).oneshot("https://shop.example/p/1".to_string()).await.unwrap();
//! assert_eq!(body, "fetched https://shop.example/p/1");
//! # }
//! ```

use crate::error::ThrottleError;
use crate::limiter::RateLimiter;
use crate::pacing::{Pacer, Sleeper};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// A layer that checks every request against a [`RateLimiter`].
#[derive(Clone)]
pub struct RateLimitLayer<F> {
    limiter: Arc<RateLimiter>,
    extractor: F,
    pacer: Option<Pacer>,
}

impl<F> RateLimitLayer<F> {
    /// Check requests against `limiter`, keyed by `extractor(&request) -> (identifier, domain)`.
    pub fn new(limiter: Arc<RateLimiter>, extractor: F) -> Self {
        Self { limiter, extractor, pacer: None }
    }

    /// Wait the advisory delay, scaled from `base_delay`, before forwarding admitted requests.
    pub fn with_pacing(self, base_delay: Duration) -> Self {
        self.with_pacer(Pacer::new(base_delay))
    }

    /// Like [`with_pacing`](Self::with_pacing) with a custom sleeper.
    pub fn with_pacing_sleeper(self, base_delay: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        self.with_pacer(Pacer::with_sleeper(base_delay, sleeper))
    }

    /// Pace admitted requests with `pacer`.
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }
}

impl<F> fmt::Debug for RateLimitLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer").field("pacer", &self.pacer).finish_non_exhaustive()
    }
}

impl<S, F: Clone> Layer<S> for RateLimitLayer<F> {
    type Service = RateLimitService<S, F>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
            pacer: self.pacer.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S, F> {
    inner: S,
    limiter: Arc<RateLimiter>,
    extractor: F,
    pacer: Option<Pacer>,
}

impl<S: fmt::Debug, F> fmt::Debug for RateLimitService<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("pacer", &self.pacer)
            .finish_non_exhaustive()
    }
}

impl<S, F, Req> Service<Req> for RateLimitService<S, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    F: Fn(&Req) -> (String, String) + Clone + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ThrottleError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        // Call the instance poll_ready drove; the fresh clone waits for the next request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let pacer = self.pacer.clone();
        let (identifier, domain) = (self.extractor)(&req);

        Box::pin(async move {
            let decision = limiter.check_limit(&identifier, &domain).await;
            if !decision.allowed {
                let retry_after = Duration::from_millis(limiter.calculate_delay(&decision, 0));
                tracing::debug!(%identifier, %domain, ?retry_after, "request rate limited");
                return Err(ThrottleError::RateLimited { retry_after, decision: Box::new(decision) });
            }

            if let Some(pacer) = pacer {
                pacer.pace(&decision).await;
            }

            inner.call(req).await.map_err(ThrottleError::Inner)
        })
    }
}
