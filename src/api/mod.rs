//! S3 API implementation: SigV4 verification, the request dispatcher,
//! and the XML wire codec.

pub mod auth;
mod aws_chunked;
mod errors;
pub mod handlers;
mod xml;

pub use errors::S3Error;
pub use handlers::AppState;
