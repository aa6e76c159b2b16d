//! gRPC services served by the process.
//!
//! ## Structure
//!
//! - [`greeter`] - the `greeter.Greeter` service (`GreeterService`).

pub mod greeter;

use greeter::GreeterService;
use tonic::codec::CompressionEncoding;
use tonic_boot_core::proto::greeter::greeter_server::GreeterServer;

pub fn build_greeter_service() -> GreeterServer<GreeterService> {
    GreeterServer::new(GreeterService)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}
