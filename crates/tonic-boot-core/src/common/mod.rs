pub mod context;
pub mod error;
pub mod request_id;

pub use context::RequestContext;
pub use error::{Error, Result};
