//! The `greeter.Greeter` service.
//!
//! `SayHello` answers `Hello <name>!`. The handler logs through the call's
//! [`RequestContext`] logger so its events carry the method and request
//! identifier recorded by the interceptors. Calls that bypass the interceptor
//! chain fall back to the current span.

use tonic::{Request, Response, Status};
use tonic_boot_core::proto::greeter::greeter_server::Greeter;
use tonic_boot_core::proto::greeter::{HelloRequest, HelloResponse};
use tonic_boot_core::{Error, RequestContext};
use tracing::Span;

#[derive(Clone, Copy, Debug, Default)]
pub struct GreeterService;

#[tonic::async_trait]
impl Greeter for GreeterService {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let logger = RequestContext::from_request(&request)
            .map_or_else(Span::current, |ctx| ctx.logger().clone());
        logger.in_scope(|| tracing::info!("Received request from client."));

        let HelloRequest { name } = request.into_inner();
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest {
                reason: "name must not be empty".to_string(),
            }
            .into());
        }

        Ok(Response::new(HelloResponse {
            message: format!("Hello {name}!"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[tokio::test]
    async fn greets_by_name() -> Result<(), Status> {
        let response = GreeterService
            .say_hello(Request::new(HelloRequest {
                name: "tonic".to_string(),
            }))
            .await?;
        assert_eq!(response.into_inner().message, "Hello tonic!");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_empty_name() {
        let status = GreeterService
            .say_hello(Request::new(HelloRequest {
                name: "  ".to_string(),
            }))
            .await
            .expect_err("empty name");
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "name must not be empty");
    }
}
