//! Tower middleware injecting the resource kind into request extensions.
//!
//! Tonic interceptors cannot see the request URI, so the kind lookup runs
//! as an HTTP-level middleware wrapped around the routed service. Handlers
//! read the kind back out of `tonic::Request::extensions()`; running a
//! controller without this layer installed is a hard `Internal` error.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use lodestar_proto::v1::ResourceKind;

use crate::registry::KindRegistry;

/// Layer installing [`KindService`].
#[derive(Clone)]
pub struct KindLayer {
    registry: Arc<KindRegistry>,
}

impl KindLayer {
    /// Create the layer over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for KindLayer {
    type Service = KindService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        KindService {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Service wrapper that resolves the kind from the request path.
#[derive(Clone)]
pub struct KindService<S> {
    inner: S,
    registry: Arc<KindRegistry>,
}

impl<S, B> Service<http::Request<B>> for KindService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        let kind = self.registry.kind_for_method(request.uri().path());
        if kind != ResourceKind::Unspecified {
            request.extensions_mut().insert(kind);
        }
        self.inner.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[derive(Clone)]
    struct Probe;

    impl Service<http::Request<()>> for Probe {
        type Response = Option<ResourceKind>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: http::Request<()>) -> Self::Future {
            std::future::ready(Ok(request.extensions().get::<ResourceKind>().copied()))
        }
    }

    #[tokio::test]
    async fn test_kind_injected_for_known_service() {
        let layer = KindLayer::new(Arc::new(KindRegistry::new()));
        let mut service = layer.layer(Probe);
        let request = http::Request::builder()
            .uri("/lodestar.v1.WorkflowCommandService/Apply")
            .body(())
            .unwrap();
        let kind = service.call(request).await.unwrap();
        assert_eq!(kind, Some(ResourceKind::Workflow));
    }

    #[tokio::test]
    async fn test_unknown_service_left_untouched() {
        let layer = KindLayer::new(Arc::new(KindRegistry::new()));
        let mut service = layer.layer(Probe);
        let request = http::Request::builder()
            .uri("/grpc.health.v1.Health/Check")
            .body(())
            .unwrap();
        let kind = service.call(request).await.unwrap();
        assert_eq!(kind, None);
    }
}
