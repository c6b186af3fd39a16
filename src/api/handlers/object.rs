//! Object-scoped operations: HeadObject, GetObject, PutObject,
//! DeleteObject (§4.E).

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Extension;
use chrono::{DateTime, Utc};

use crate::api::aws_chunked::{decode_aws_chunked, get_decoded_content_length, is_aws_chunked};
use crate::api::errors::S3Error;
use crate::db::User;

use super::bucket::{authorize_bucket, validate_key};
use super::AppState;

fn rfc1123(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub async fn head_object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    validate_key(&bucket, &key)?;
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;
    let object = state.repo.get_object(owned.id, &key)?.ok_or_else(|| S3Error::NoSuchKey {
        resource: format!("/{bucket}/{key}"),
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, object.etag)
        .header(header::CONTENT_LENGTH, object.size.to_string())
        .header(header::CONTENT_TYPE, object.content_type)
        .header("Last-Modified", rfc1123(&object.last_modified))
        .body(Body::empty())
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))
}

pub async fn get_object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    validate_key(&bucket, &key)?;
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;
    let object = state.repo.get_object(owned.id, &key)?.ok_or_else(|| S3Error::NoSuchKey {
        resource: format!("/{bucket}/{key}"),
    })?;

    let stream = state
        .store
        .open_object_stream(std::path::Path::new(&object.filepath))
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, object.etag)
        .header(header::CONTENT_LENGTH, object.size.to_string())
        .header(header::CONTENT_TYPE, object.content_type)
        .header("Last-Modified", rfc1123(&object.last_modified))
        .body(Body::from_stream(stream))
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))
}

pub async fn put_object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    validate_key(&bucket, &key)?;
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;

    let bytes = if is_aws_chunked(&headers) {
        let expected = get_decoded_content_length(&headers);
        decode_aws_chunked(&body, expected).ok_or_else(|| {
            S3Error::internal(format!("/{bucket}/{key}"), "malformed AWS chunked body")
        })?
    } else {
        body
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let saved = state
        .store
        .save_object(&bucket, &key, &bytes)
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;
    let etag = format!("\"{}\"", saved.etag_hex);

    state.repo.put_object(
        owned.id,
        &key,
        saved.size,
        &etag,
        &saved.filepath.display().to_string(),
        &content_type,
    )?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, etag)
        .body(Body::empty())
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, S3Error> {
    validate_key(&bucket, &key)?;
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;

    if let Some(object) = state.repo.get_object(owned.id, &key)? {
        state
            .store
            .delete_object(std::path::Path::new(&object.filepath))
            .await
            .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;
        state.repo.delete_object(owned.id, &key)?;
    }

    Ok(StatusCode::NO_CONTENT)
}
