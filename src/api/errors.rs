//! S3 wire-facing error type: each variant knows its own S3 error code,
//! HTTP status, and renders itself as the `<Error>` XML document (§6, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::db::RepoError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("NoSuchBucket: The specified bucket does not exist.")]
    NoSuchBucket { resource: String },

    #[error("NoSuchKey: The specified key does not exist.")]
    NoSuchKey { resource: String },

    #[error("NoSuchUpload: The specified multipart upload does not exist.")]
    NoSuchUpload { resource: String },

    #[error("BucketAlreadyOwnedByYou: Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou { resource: String },

    #[error("BucketNotEmpty: The bucket you tried to delete is not empty.")]
    BucketNotEmpty { resource: String },

    #[error("InvalidPart: One or more of the specified parts could not be found or the ETag does not match.")]
    InvalidPart { message: String },

    #[error("NotImplemented: This bucket-level operation is not supported.")]
    NotImplemented { resource: String },

    /// Any SigV4 parse failure, unknown access key, or signature mismatch.
    /// Deliberately carries no detail beyond the category (§7).
    #[error("AccessDenied: Access Denied.")]
    AuthFailed,

    #[error("InternalError: We encountered an internal error. Please try again.")]
    Internal { resource: String },
}

impl S3Error {
    /// Construct an `Internal` error, logging the underlying cause at
    /// `error!` so operators can diagnose failures the client never sees
    /// the detail of (§7, §10.A).
    pub fn internal(resource: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        let resource = resource.into();
        error!(resource = %resource, cause = %cause, "internal error");
        S3Error::Internal { resource }
    }

    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::InvalidPart { .. } => "InvalidPart",
            S3Error::NotImplemented { .. } => "NotImplemented",
            S3Error::AuthFailed => "AccessDenied",
            S3Error::Internal { .. } => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. }
            | S3Error::NoSuchKey { .. }
            | S3Error::NoSuchUpload { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyOwnedByYou { .. } | S3Error::BucketNotEmpty { .. } => {
                StatusCode::CONFLICT
            }
            S3Error::InvalidPart { .. } => StatusCode::BAD_REQUEST,
            S3Error::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            S3Error::AuthFailed => StatusCode::FORBIDDEN,
            S3Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket { resource }
            | S3Error::NoSuchKey { resource }
            | S3Error::NoSuchUpload { resource }
            | S3Error::BucketAlreadyOwnedByYou { resource }
            | S3Error::BucketNotEmpty { resource }
            | S3Error::NotImplemented { resource }
            | S3Error::Internal { resource } => resource,
            S3Error::InvalidPart { .. } | S3Error::AuthFailed => "",
        }
    }

    fn message(&self) -> String {
        match self {
            S3Error::InvalidPart { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{}</Code>
  <Message>{}</Message>
  <Resource>{}</Resource>
</Error>"#,
            self.code(),
            super::xml::escape_xml(&self.message()),
            super::xml::escape_xml(self.resource()),
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_xml();
        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        S3Error::internal("", err)
    }
}

/// Bucket/key-unaware conversion; handlers that know the resource name
/// should prefer mapping `RepoError` variants explicitly so the XML
/// `<Resource>` element is populated.
impl From<RepoError> for S3Error {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NoSuchBucket => S3Error::NoSuchBucket {
                resource: String::new(),
            },
            RepoError::NoSuchKey => S3Error::NoSuchKey {
                resource: String::new(),
            },
            RepoError::NoSuchUpload => S3Error::NoSuchUpload {
                resource: String::new(),
            },
            RepoError::BucketAlreadyExists => S3Error::BucketAlreadyOwnedByYou {
                resource: String::new(),
            },
            RepoError::BucketNotEmpty => S3Error::BucketNotEmpty {
                resource: String::new(),
            },
            RepoError::Sqlite(e) => S3Error::internal("", e),
        }
    }
}
