//! Interceptor composition.
//!
//! A [`Chain`] is an immutable, ordered list of interceptors. Building it
//! around a terminal service yields an [`InterceptedService`] equivalent to
//! `unit[0]` wrapping `unit[1]` wrapping ... wrapping the terminal. The chain
//! holds no per-call state, so one built service is cloned for every
//! connection and invoked concurrently.
//!
//! The remainder of the pipeline is handed to each unit as a [`Next`].
//! [`Next::run`] consumes the handle, so a unit can delegate at most once;
//! not delegating at all short-circuits the call.

use super::{BoxError, GrpcRequest, GrpcResponse, Interceptor};
use crate::RequestContext;
use bytes::Bytes;
use core::fmt;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use std::sync::Arc;
use tonic::body::Body;
use tonic::codegen::{Body as HttpBody, http};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

type Endpoint = BoxCloneSyncService<GrpcRequest, GrpcResponse, BoxError>;

/// An ordered, immutable sequence of interceptors.
#[derive(Clone)]
pub struct Chain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Chain {
    /// Starts an empty chain.
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// A chain without interceptors. Calls still receive a
    /// [`RequestContext`].
    pub fn empty() -> Self {
        Self::builder().build()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Wraps `terminal` with every interceptor of the chain.
    pub fn build<S, ResBody>(&self, terminal: S) -> InterceptedService
    where
        S: Service<GrpcRequest, Response = http::Response<ResBody>> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        ResBody: HttpBody<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError>,
    {
        let endpoint = terminal
            .map_response(|res: http::Response<ResBody>| res.map(Body::new))
            .map_err(Into::<BoxError>::into);

        InterceptedService {
            interceptors: Arc::clone(&self.interceptors),
            endpoint: BoxCloneSyncService::new(endpoint),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl<S, ResBody> Layer<S> for Chain
where
    S: Service<GrpcRequest, Response = http::Response<ResBody>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Service = InterceptedService;

    fn layer(&self, inner: S) -> Self::Service {
        self.build(inner)
    }
}

/// Collects interceptors in declaration order.
#[derive(Default)]
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    /// Appends an interceptor. It runs after (inside) every interceptor added
    /// before it.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends an already shared interceptor.
    #[must_use]
    pub fn with_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Chain {
        Chain {
            interceptors: self.interceptors.into(),
        }
    }
}

/// The remainder of the pipeline after the current interceptor.
pub struct Next {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    position: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Runs the rest of the chain, ending at the terminal service.
    pub async fn run(
        mut self,
        ctx: &RequestContext,
        req: GrpcRequest,
    ) -> Result<GrpcResponse, BoxError> {
        let current = self.interceptors.get(self.position).cloned();
        match current {
            Some(interceptor) => {
                self.position += 1;
                interceptor.intercept(ctx, req, self).await
            }
            None => self.endpoint.oneshot(req).await,
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.interceptors.len() - self.position))
            .finish()
    }
}

/// A terminal service wrapped by a [`Chain`].
///
/// Every call gets a fresh [`RequestContext`], inserted into the request
/// extensions before the first interceptor runs.
#[derive(Clone)]
pub struct InterceptedService {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    endpoint: Endpoint,
}

impl Service<GrpcRequest> for InterceptedService {
    type Response = GrpcResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the terminal is awaited per call by `Next::run`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: GrpcRequest) -> Self::Future {
        let next = Next {
            interceptors: Arc::clone(&self.interceptors),
            position: 0,
            endpoint: self.endpoint.clone(),
        };

        Box::pin(async move {
            let ctx = RequestContext::new(req.uri().path());
            req.extensions_mut().insert(ctx.clone());
            next.run(&ctx, req).await
        })
    }
}
