//! Request identifier propagation.
//!
//! [`MetaInterceptor`] guarantees every call carries a request identifier:
//!
//! 1. the inbound value under the request-id header is used when present,
//!    otherwise a fresh identifier is generated;
//! 2. the identifier is added to the [`RequestContext`] before delegating;
//! 3. on the way out, every identifier added to the context during the call is
//!    **appended** to the response under the same header key.
//!
//! Handlers and later interceptors stamp additional identifiers with
//! [`add_response_identifier`]. Appending never removes the inbound or
//! generated value, so a client may see several values for the header, while
//! the logging interceptor picks the most recent one.
//!
//! The header key defaults to `x-request-id`. A prefix override inserts the
//! prefix after `x-`: prefix `Dog` yields `x-dog-request-id`.

use super::{BoxError, GrpcRequest, GrpcResponse, Interceptor, Next};
use crate::request_id::generate_request_id;
use crate::{Error, RequestContext, Result};
use tonic::codegen::http::{HeaderName, HeaderValue};

/// Default request identifier header key.
pub const DEFAULT_REQUEST_ID_KEY: &str = "x-request-id";

/// Appends an identifier to the call's response metadata and makes it the
/// canonical request identifier. Earlier identifiers are kept.
pub fn add_response_identifier(ctx: &RequestContext, value: impl Into<String>) {
    ctx.add_request_id(value);
}

#[derive(Clone, Debug)]
struct AppInfo {
    name_key: HeaderName,
    name: HeaderValue,
    version_key: HeaderName,
    version: HeaderValue,
}

/// Ensures each call has a request identifier and echoes identifiers on the
/// response.
#[derive(Clone, Debug)]
pub struct MetaInterceptor {
    prefix: Option<String>,
    request_id_key: HeaderName,
    app: Option<AppInfo>,
}

impl Default for MetaInterceptor {
    fn default() -> Self {
        Self {
            prefix: None,
            request_id_key: HeaderName::from_static(DEFAULT_REQUEST_ID_KEY),
            app: None,
        }
    }
}

impl MetaInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the header prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the prefix does not produce a valid
    /// header name.
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self> {
        let prefix = prefix.trim().to_ascii_lowercase();
        self.request_id_key = header_key(Some(&prefix), "request-id")?;
        self.prefix = Some(prefix);
        if let Some(app) = self.app.take() {
            self.app = Some(AppInfo {
                name_key: header_key(self.prefix.as_deref(), "app-name")?,
                version_key: header_key(self.prefix.as_deref(), "app-version")?,
                ..app
            });
        }
        Ok(self)
    }

    /// Stamps the application name and version on every response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if either value is not a valid header
    /// value.
    pub fn with_app_info(mut self, name: &str, version: &str) -> Result<Self> {
        let value = |v: &str| {
            HeaderValue::from_str(v).map_err(|_| Error::Configuration {
                reason: format!("`{v}` is not a valid header value"),
            })
        };
        self.app = Some(AppInfo {
            name_key: header_key(self.prefix.as_deref(), "app-name")?,
            name: value(name)?,
            version_key: header_key(self.prefix.as_deref(), "app-version")?,
            version: value(version)?,
        });
        Ok(self)
    }

    /// The header key carrying request identifiers.
    pub fn request_id_key(&self) -> &HeaderName {
        &self.request_id_key
    }
}

fn header_key(prefix: Option<&str>, suffix: &str) -> Result<HeaderName> {
    let key = match prefix {
        Some(prefix) if !prefix.is_empty() => format!("x-{prefix}-{suffix}"),
        _ => format!("x-{suffix}"),
    };
    HeaderName::try_from(key.as_str()).map_err(|_| Error::InvalidHeader { key })
}

#[tonic::async_trait]
impl Interceptor for MetaInterceptor {
    async fn intercept(
        &self,
        ctx: &RequestContext,
        req: GrpcRequest,
        next: Next,
    ) -> core::result::Result<GrpcResponse, BoxError> {
        let request_id = req
            .headers()
            .get(&self.request_id_key)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map_or_else(generate_request_id, str::to_string);
        ctx.add_request_id(request_id);

        let mut res = next.run(ctx, req).await?;

        let headers = res.headers_mut();
        for id in ctx.request_ids() {
            match HeaderValue::try_from(id) {
                Ok(value) => {
                    headers.append(self.request_id_key.clone(), value);
                }
                Err(e) => {
                    tracing::warn!("Dropping request id that is not a valid header value: {e}");
                }
            }
        }
        if let Some(app) = &self.app {
            headers.insert(app.name_key.clone(), app.name.clone());
            headers.insert(app.version_key.clone(), app.version.clone());
        }

        Ok(res)
    }
}
