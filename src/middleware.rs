use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use crate::engine::{Decision, RateLimiter};
use crate::error::AdmissionError;
use crate::subject::SubjectResolver;

/// A layer that gates one route behind a [`RateLimiter`].
///
/// Each protected endpoint gets its own layer carrying its route identifier;
/// the subject is derived per request by the [`SubjectResolver`].
#[derive(Debug)]
pub struct AdmissionLayer<L, R> {
    limiter: Arc<L>,
    resolver: Arc<R>,
    route: Arc<str>,
}

impl<L, R> Clone for AdmissionLayer<L, R> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), resolver: self.resolver.clone(), route: self.route.clone() }
    }
}

impl<L, R> AdmissionLayer<L, R> {
    /// Create a new admission layer for `route`.
    pub fn new(limiter: L, resolver: R, route: impl Into<String>) -> Self {
        Self::shared(Arc::new(limiter), Arc::new(resolver), route)
    }

    /// Like [`new`](Self::new) for a limiter and resolver already shared
    /// between several routes.
    pub fn shared(limiter: Arc<L>, resolver: Arc<R>, route: impl Into<String>) -> Self {
        Self { limiter, resolver, route: Arc::from(route.into()) }
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

impl<S, L, R> Layer<S> for AdmissionLayer<L, R> {
    type Service = AdmissionService<S, L, R>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            route: self.route.clone(),
        }
    }
}

/// Middleware service that rejects over-quota requests before they reach
/// the inner service.
#[derive(Debug)]
pub struct AdmissionService<S, L, R> {
    inner: S,
    limiter: Arc<L>,
    resolver: Arc<R>,
    route: Arc<str>,
}

impl<S: Clone, L, R> Clone for AdmissionService<S, L, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            route: self.route.clone(),
        }
    }
}

impl<S, L, R, Req> Service<Req> for AdmissionService<S, L, R>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: RateLimiter + 'static,
    R: SubjectResolver<Req> + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let route = self.route.clone();
        let subject_id = self.resolver.resolve(&req).id();
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.check_rate_limit(&subject_id, &route).await {
                Decision::Allowed { .. } => inner.call(req).await.map_err(AdmissionError::Inner),
                Decision::Denied { retry_after_secs, .. } => {
                    Err(AdmissionError::RateLimited { route: route.to_string(), retry_after_secs })
                }
            }
        })
    }
}
