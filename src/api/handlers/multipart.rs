//! Multipart upload operations: InitiateMultipartUpload, UploadPart,
//! CompleteMultipartUpload, AbortMultipartUpload (§4.E).

use std::collections::HashMap;
use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use uuid::Uuid;

use crate::api::aws_chunked::{decode_aws_chunked, get_decoded_content_length, is_aws_chunked};
use crate::api::errors::S3Error;
use crate::api::xml::{
    parse_complete_multipart_upload, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
};
use crate::db::User;

use super::bucket::{authorize_bucket, validate_key};
use super::AppState;

/// Look up an upload and confirm it belongs to the `(bucket, key)` named
/// in the URL; a mismatch is indistinguishable from an unknown upload id.
fn resolve_upload(
    state: &AppState,
    upload_id: &str,
    bucket: &str,
    key: &str,
) -> Result<crate::db::MultipartUpload, S3Error> {
    state
        .repo
        .get_multipart_upload(upload_id)?
        .filter(|u| u.bucket_name == bucket && u.object_name == key)
        .ok_or_else(|| S3Error::NoSuchUpload {
            resource: format!("/{bucket}/{key}"),
        })
}

pub async fn initiate_multipart_upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, S3Error> {
    validate_key(&bucket, &key)?;
    authorize_bucket(&state.repo, &user, &bucket)?;

    let upload_id = Uuid::new_v4().to_string();
    state.repo.create_multipart_upload(&upload_id, &bucket, &key)?;

    let result = InitiateMultipartUploadResult {
        bucket,
        key,
        upload_id,
    };
    Ok(([("Content-Type", "application/xml")], result.to_xml()))
}

pub async fn upload_part(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    authorize_bucket(&state.repo, &user, &bucket)?;

    let upload_id = query.get("uploadId").cloned().ok_or_else(|| S3Error::NoSuchUpload {
        resource: format!("/{bucket}/{key}"),
    })?;
    let part_number: i64 = query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| S3Error::InvalidPart {
            message: "missing or invalid partNumber".into(),
        })?;

    resolve_upload(&state, &upload_id, &bucket, &key)?;

    let bytes = if is_aws_chunked(&headers) {
        let expected = get_decoded_content_length(&headers);
        decode_aws_chunked(&body, expected).ok_or_else(|| {
            S3Error::internal(format!("/{bucket}/{key}"), "malformed AWS chunked body")
        })?
    } else {
        body
    };

    let saved = state
        .store
        .save_part(&upload_id, part_number, &bytes)
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;
    let etag = format!("\"{}\"", saved.etag_hex);

    state.repo.upsert_multipart_part(
        &upload_id,
        part_number,
        &etag,
        &saved.filepath.display().to_string(),
        saved.size,
    )?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, etag)
        .body(Body::empty())
        .expect("static header values are valid");
    Ok(response)
}

pub async fn complete_multipart_upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, S3Error> {
    authorize_bucket(&state.repo, &user, &bucket)?;

    let upload_id = query.get("uploadId").cloned().ok_or_else(|| S3Error::NoSuchUpload {
        resource: format!("/{bucket}/{key}"),
    })?;

    resolve_upload(&state, &upload_id, &bucket, &key)?;

    let body_str = std::str::from_utf8(&body).map_err(|e| S3Error::InvalidPart {
        message: format!("request body is not valid UTF-8: {e}"),
    })?;
    let requested_parts = parse_complete_multipart_upload(body_str)
        .map_err(|e| S3Error::InvalidPart { message: e.to_string() })?;

    let stored_parts = state.repo.list_multipart_parts(&upload_id)?;

    if requested_parts.len() != stored_parts.len() {
        return Err(S3Error::InvalidPart {
            message: format!(
                "part count mismatch: client sent {}, {} stored",
                requested_parts.len(),
                stored_parts.len()
            ),
        });
    }

    let requested_by_number: HashMap<i64, &str> = requested_parts
        .iter()
        .map(|(num, etag)| (i64::from(*num), etag.as_str()))
        .collect();

    for stored in &stored_parts {
        let req_etag = requested_by_number.get(&stored.part_number).ok_or_else(|| {
            S3Error::InvalidPart {
                message: format!("missing part {}", stored.part_number),
            }
        })?;
        if *req_etag != stored.etag.trim_matches('"') {
            return Err(S3Error::InvalidPart {
                message: format!("ETag mismatch for part {}", stored.part_number),
            });
        }
    }

    let part_paths: Vec<(i64, PathBuf)> = stored_parts
        .iter()
        .map(|p| (p.part_number, PathBuf::from(&p.filepath)))
        .collect();

    let (size, etag) = state
        .store
        .combine_parts(&bucket, &key, &part_paths)
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;

    let bucket_row = state
        .repo
        .get_bucket_by_name(&bucket)?
        .ok_or_else(|| S3Error::NoSuchBucket {
            resource: format!("/{bucket}"),
        })?;
    let filepath = state.store.object_filepath(&bucket, &key);

    state.repo.complete_multipart_upload_transaction(
        &upload_id,
        bucket_row.id,
        &key,
        size,
        &etag,
        &filepath.display().to_string(),
        "application/octet-stream",
    )?;

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    let result = CompleteMultipartUploadResult {
        location: format!("http://{host}/{bucket}/{key}"),
        bucket,
        key,
        etag,
    };
    Ok(([("Content-Type", "application/xml")], result.to_xml()))
}

pub async fn abort_multipart_upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<StatusCode, S3Error> {
    authorize_bucket(&state.repo, &user, &bucket)?;

    let upload_id = query.get("uploadId").cloned().ok_or_else(|| S3Error::NoSuchUpload {
        resource: format!("/{bucket}/{key}"),
    })?;

    resolve_upload(&state, &upload_id, &bucket, &key)?;

    state
        .store
        .cleanup_parts(&upload_id)
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}/{key}"), e))?;
    state.repo.delete_multipart_upload(&upload_id)?;

    Ok(StatusCode::NO_CONTENT)
}
