//! Error types for entry lifecycle management and request handling.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure raised while configuring, bootstrapping and interrupting
//! entries. It implements `From<Error>` for `tonic::Status` so handlers can
//! surface library errors to clients with `?`.
//!
//! ## Error Cases
//! - `DuplicateEntry`, `Configuration`, `InvalidHeader`: the boot
//!   configuration is unusable. Fatal at startup.
//! - `AlreadyBootstrapped`, `Bootstrap`: an entry could not start serving.
//!   Fatal at startup.
//! - `Interrupt`: a single entry failed to drain. Collected during shutdown.
//! - `Shutdown`: the aggregate of every `Interrupt` failure.
//! - `InvalidRequest`: a handler rejected the client's input.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for entries, the registry and request handlers.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Two entries were registered under the same name.
    #[error("Entry `{name}` is already registered")]
    DuplicateEntry { name: String },

    /// The boot configuration is malformed.
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// A configured header key is not a valid HTTP/2 header name.
    #[error("Invalid header key: {key}")]
    InvalidHeader { key: String },

    /// Bootstrap was called on an entry that is already serving.
    #[error("Entry `{name}` is already bootstrapped")]
    AlreadyBootstrapped { name: String },

    /// An entry failed to bind or start its listener.
    #[error("Failed to bootstrap entry `{name}`: {reason}")]
    Bootstrap { name: String, reason: String },

    /// An entry failed to drain cleanly.
    #[error("Failed to interrupt entry `{name}`: {reason}")]
    Interrupt { name: String, reason: String },

    /// One or more entries failed to interrupt during shutdown.
    #[error("{} entries failed to interrupt", failures.len())]
    Shutdown { failures: Vec<Error> },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Interrupt { .. } | Error::Shutdown { .. } => {
                Status::unavailable("Service is shutting down")
            }
            other => Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn maps_to_grpc_status() {
        let status: Status = Error::InvalidRequest {
            reason: "name must not be empty".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "name must not be empty");

        let status: Status = Error::Shutdown { failures: vec![] }.into();
        assert_eq!(status.code(), Code::Unavailable);

        let status: Status = Error::DuplicateEntry {
            name: "greeter".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn shutdown_reports_failure_count() {
        let err = Error::Shutdown {
            failures: vec![Error::Interrupt {
                name: "a".to_string(),
                reason: "boom".to_string(),
            }],
        };
        assert_eq!(err.to_string(), "1 entries failed to interrupt");
    }
}
